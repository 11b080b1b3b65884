//! Unit status and sense bytes.
use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// The status byte a unit presents with status-in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    pub struct Status: u8 {
        const ATTENTION = 0x80;
        const STATUS_MODIFIER = 0x40;
        const CONTROL_UNIT_END = 0x20;
        const BUSY = 0x10;
        const CHANNEL_END = 0x08;
        const DEVICE_END = 0x04;
        const UNIT_CHECK = 0x02;
        const UNIT_EXCEPTION = 0x01;
    }
}

bitflags! {
    /// Sense byte zero, common to the unit record devices.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    pub struct Sense: u8 {
        const COMMAND_REJECT = 0x80;
        const INTERVENTION_REQUIRED = 0x40;
        const BUS_OUT_CHECK = 0x20;
        const EQUIPMENT_CHECK = 0x10;
        const DATA_CHECK = 0x08;
        const OVERRUN = 0x04;
    }
}

impl Status {
    /// Channel end and device end together; the status of a command
    /// which completed during initial selection.
    pub const CE_DE: Status = Status::CHANNEL_END.union(Status::DEVICE_END);

    /// Status presented for a command which failed during initial
    /// selection.
    pub const CE_DE_UC: Status = Status::CE_DE.union(Status::UNIT_CHECK);

    /// The bits a device may contribute to ending status on its own
    /// account.
    pub const DEVICE_CONDITIONS: Status = Status::UNIT_CHECK.union(Status::UNIT_EXCEPTION);
}

#[test]
fn test_composite_status() {
    assert_eq!(Status::CE_DE.bits(), 0x0C);
    assert_eq!(Status::CE_DE_UC.bits(), 0x0E);
}
