//! The state of the I/O interface during one cycle.
use serde::Serialize;

use super::parity::BusByte;
use super::tags::{TagsIn, TagsOut};

/// Everything on the interface cable: both tag groups and both data
/// buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Bus {
    pub tags_out: TagsOut,
    pub bus_out: BusByte,
    pub tags_in: TagsIn,
    pub bus_in: BusByte,
}

impl Bus {
    /// Drops every inbound line.  The inbound side is rebuilt by the
    /// control units on every scan.
    pub fn clear_inbound(&mut self) {
        self.tags_in = TagsIn::empty();
        self.bus_in = BusByte::ZERO;
    }
}

#[test]
fn test_clear_inbound_leaves_outbound_alone() {
    let mut bus = Bus {
        tags_out: TagsOut::OPR_OUT | TagsOut::SEL_OUT,
        bus_out: BusByte::with_parity(0x0E),
        tags_in: TagsIn::OPR_IN | TagsIn::STA_IN,
        bus_in: BusByte::with_parity(0x0C),
    };
    bus.clear_inbound();
    assert_eq!(bus.tags_in, TagsIn::empty());
    assert_eq!(bus.bus_in, BusByte::ZERO);
    assert_eq!(bus.tags_out, TagsOut::OPR_OUT | TagsOut::SEL_OUT);
    assert_eq!(bus.bus_out.data(), 0x0E);
}
