use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// Things the outside world does to a device (an operator loading
/// cards, or typing at the console).
#[derive(Debug)]
pub enum InputEvent {
    LoadCards { cards: Vec<Vec<u8>> },
    ConsoleKeyboard { data: Vec<u8> },
}

#[derive(Debug, PartialEq, Eq)]
pub enum InputEventError {
    /// InputOnUnattachedUnit means that the user has generated input
    /// for an address at which no unit is attached.  This would
    /// likely be due to some configuration inconsistency between the
    /// user interface and the simulator core.
    InputOnUnattachedUnit(u8),

    InputEventNotValidForDevice,

    /// The device has nowhere to put the input (for example, the card
    /// hopper is full).
    BufferUnavailable,
}

impl Display for InputEventError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            InputEventError::InputOnUnattachedUnit(address) => {
                write!(f, "input for address {address:02X}, where no unit is attached")
            }
            InputEventError::InputEventNotValidForDevice => {
                f.write_str("input event is not valid for this device")
            }
            InputEventError::BufferUnavailable => f.write_str("buffer unavailable"),
        }
    }
}

impl Error for InputEventError {}

/// Things a device does to the outside world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OutputEvent {
    ConsolePrint { address: u8, byte: u8 },
    ConsoleAlarm { address: u8 },
    CardStacked { address: u8, card: Vec<u8> },
}
