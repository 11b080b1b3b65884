//! Decoding of command bytes.
//!
//! The low-order bits of a command byte select the kind of operation;
//! the high-order bits are modifiers whose meaning belongs to the
//! device.
//!
//! | bits     | operation     |
//! | -------- | ------------- |
//! | 00000000 | (test I/O)    |
//! | xxxxxx01 | write         |
//! | xxxxxx10 | read          |
//! | xxxxxx11 | control       |
//! | xxxx0100 | sense         |
//! | xxxx1000 | transfer in channel (never reaches a unit) |
//! | xxxx1100 | read backward |
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// Which way bytes flow during a data transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// Unit to channel (read, sense).
    Input,
    /// Channel to unit (write).
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CommandKind {
    TestIo,
    Write,
    Read,
    Control,
    Sense,
    TransferInChannel,
    ReadBackward,
    /// Low bits 0000 with a nonzero modifier.
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Command(pub u8);

impl Command {
    pub const SENSE: Command = Command(0x04);
    pub const NOP: Command = Command(0x03);

    #[must_use]
    pub fn kind(self) -> CommandKind {
        let b = self.0;
        match b & 0x03 {
            0x01 => CommandKind::Write,
            0x02 => CommandKind::Read,
            0x03 => CommandKind::Control,
            _ => match b & 0x0F {
                0x04 => CommandKind::Sense,
                0x08 => CommandKind::TransferInChannel,
                0x0C => CommandKind::ReadBackward,
                _ if b == 0 => CommandKind::TestIo,
                _ => CommandKind::Invalid,
            },
        }
    }

    /// The direction of data transfer implied by the command, if any.
    #[must_use]
    pub fn direction(self) -> Option<Direction> {
        match self.kind() {
            CommandKind::Write => Some(Direction::Output),
            CommandKind::Read | CommandKind::Sense | CommandKind::ReadBackward => {
                Some(Direction::Input)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn modifier(self) -> u8 {
        match self.kind() {
            CommandKind::Write | CommandKind::Read | CommandKind::Control => self.0 >> 2,
            _ => self.0 >> 4,
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{:02X} ({:?})", self.0, self.kind())
    }
}

#[test]
fn test_command_kinds() {
    assert_eq!(Command(0x00).kind(), CommandKind::TestIo);
    assert_eq!(Command(0x01).kind(), CommandKind::Write);
    assert_eq!(Command(0x09).kind(), CommandKind::Write);
    assert_eq!(Command(0x02).kind(), CommandKind::Read);
    assert_eq!(Command(0x0A).kind(), CommandKind::Read);
    assert_eq!(Command(0x03).kind(), CommandKind::Control);
    assert_eq!(Command(0x13).kind(), CommandKind::Control);
    assert_eq!(Command(0x04).kind(), CommandKind::Sense);
    assert_eq!(Command(0x08).kind(), CommandKind::TransferInChannel);
    assert_eq!(Command(0x0C).kind(), CommandKind::ReadBackward);
    assert_eq!(Command(0x10).kind(), CommandKind::Invalid);
}

#[test]
fn test_command_direction() {
    assert_eq!(Command(0x01).direction(), Some(Direction::Output));
    assert_eq!(Command(0x04).direction(), Some(Direction::Input));
    assert_eq!(Command(0x03).direction(), None);
    assert_eq!(Command(0x00).direction(), None);
}

#[test]
fn test_modifier() {
    assert_eq!(Command(0x13).modifier(), 0x04);
    assert_eq!(Command(0x14).modifier(), 0x01);
}
