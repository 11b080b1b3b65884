//! Tag lines of the System/360 I/O interface.
//!
//! The outbound ("out") tags are driven by the channel, the inbound
//! ("in") tags by whichever control unit is currently connected.
//! Request-in is the exception; it is a wired-OR which any unit may
//! raise.
//!
//! Select-out is a daisy chain.  A unit which does not respond passes
//! it on to the next unit; when it falls off the end of the chain it
//! comes back to the channel as select-in, which is why the two share
//! a bit position.
use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// Tags driven by the channel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    pub struct TagsOut: u16 {
        const SEL_OUT = 0x8000;
        const ADR_OUT = 0x4000;
        const CMD_OUT = 0x2000;
        const SRV_OUT = 0x1000;
        const SUP_OUT = 0x0800;
        const HLD_OUT = 0x0400;
        const OPR_OUT = 0x0200;
    }
}

bitflags! {
    /// Tags driven by control units.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    pub struct TagsIn: u16 {
        /// Select-out, as it returns from the end of the chain.
        const SEL_IN = 0x8000;
        const OPR_IN = 0x0080;
        const ADR_IN = 0x0040;
        const STA_IN = 0x0020;
        const SRV_IN = 0x0010;
        const REQ_IN = 0x0008;
    }
}

impl TagsOut {
    /// True when the channel is holding the selection of a unit, that
    /// is, select-out or hold-out is up.
    #[must_use]
    pub fn holding(self) -> bool {
        self.intersects(TagsOut::SEL_OUT | TagsOut::HLD_OUT)
    }

    /// Operational-out and suppress-out both down is a system reset.
    #[must_use]
    pub fn is_reset(self) -> bool {
        !self.intersects(TagsOut::OPR_OUT | TagsOut::SUP_OUT)
    }
}

#[test]
fn test_tag_values() {
    assert_eq!(TagsOut::OPR_OUT.bits(), 0x0200);
    assert_eq!(TagsOut::SEL_OUT.bits(), TagsIn::SEL_IN.bits());
    assert_eq!(TagsIn::REQ_IN.bits(), 0x0008);
}

#[test]
fn test_reset_condition() {
    assert!(TagsOut::empty().is_reset());
    assert!(TagsOut::SEL_OUT.is_reset());
    assert!(!TagsOut::SUP_OUT.is_reset());
    assert!(!(TagsOut::OPR_OUT | TagsOut::ADR_OUT).is_reset());
}

#[test]
fn test_holding() {
    assert!(TagsOut::HLD_OUT.holding());
    assert!((TagsOut::SEL_OUT | TagsOut::OPR_OUT).holding());
    assert!(!(TagsOut::OPR_OUT | TagsOut::SRV_OUT).holding());
}
