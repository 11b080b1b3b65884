//! The prelude exports the types which turn up in almost every
//! conversation about the channel interface.  Providing this prelude
//! is the main purpose of the base crate.
pub use super::bus::Bus;
pub use super::command::{Command, CommandKind, Direction};
pub use super::parity::{odd_parity_bit, BusByte};
pub use super::status::{Sense, Status};
pub use super::tags::{TagsIn, TagsOut};
