//! The `base` crate defines the System/360 I/O interface vocabulary
//! which is useful both in the simulator and in anything else which
//! needs to talk about the channel interface (for example a front
//! panel, or a trace decoder).  The idea is that such tools would
//! depend on the base crate but would not need to depend on the
//! simulator library itself.

mod bus;
mod parity;
mod status;
mod tags;

pub mod collections;
pub mod command;
pub mod prelude;

pub use bus::Bus;
pub use parity::{odd_parity_bit, BusByte};
pub use status::{Sense, Status};
pub use tags::{TagsIn, TagsOut};
