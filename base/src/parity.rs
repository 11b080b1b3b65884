//! The data bus carries eight data bits plus a parity bit.  Parity on
//! the System/360 I/O interface is odd: the parity bit is chosen so
//! that the nine bits together contain an odd number of ones.
use std::fmt::{self, Debug, Display, Formatter};

use serde::Serialize;

#[cfg(test)]
use test_strategy::proptest;

const PARITY_BIT: u16 = 0x100;

/// Returns the parity bit (0 or 1) which makes `value` odd parity.
#[must_use]
pub const fn odd_parity_bit(value: u8) -> u8 {
    if value.count_ones() % 2 == 0 {
        1
    } else {
        0
    }
}

/// A value on bus-out or bus-in: data in bits 0-7, parity in bit 8.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BusByte(u16);

impl BusByte {
    pub const ZERO: BusByte = BusByte::with_parity(0);

    /// Builds a bus value carrying `data` with correct (odd) parity.
    #[must_use]
    pub const fn with_parity(data: u8) -> BusByte {
        BusByte(data as u16 | ((odd_parity_bit(data) as u16) << 8))
    }

    /// Builds a bus value carrying `data` with the parity bit
    /// wrong.  Used to simulate a failing bus.
    #[must_use]
    pub const fn with_bad_parity(data: u8) -> BusByte {
        BusByte((BusByte::with_parity(data).0) ^ PARITY_BIT)
    }

    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn data(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// True when the nine bits carry an odd number of ones.
    #[must_use]
    pub const fn parity_ok(self) -> bool {
        self.0.count_ones() % 2 == 1
    }
}

impl Default for BusByte {
    /// An idle bus reads as zero, with correct parity.
    fn default() -> BusByte {
        BusByte::ZERO
    }
}

impl Display for BusByte {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{:02X}", self.data())?;
        if !self.parity_ok() {
            f.write_str("(PE)")?;
        }
        Ok(())
    }
}

impl Debug for BusByte {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "BusByte({:03X})", self.raw())
    }
}

#[test]
fn test_known_parity_values() {
    assert_eq!(BusByte::with_parity(0x00).raw(), 0x100);
    assert_eq!(BusByte::with_parity(0x01).raw(), 0x001);
    assert_eq!(BusByte::with_parity(0x03).raw(), 0x103);
    assert_eq!(BusByte::with_parity(0xFF).raw(), 0x1FF);
    assert_eq!(BusByte::with_parity(0x1F).raw(), 0x01F);
}

#[test]
fn test_bad_parity_is_detected() {
    let b = BusByte::with_bad_parity(0x02);
    assert_eq!(b.data(), 0x02);
    assert!(!b.parity_ok());
    assert_eq!(b.to_string(), "02(PE)");
}

#[cfg(test)]
#[proptest]
fn generated_parity_is_always_odd(data: u8) {
    let b = BusByte::with_parity(data);
    assert!(b.parity_ok());
    assert_eq!(b.data(), data);
    assert!(!BusByte::with_bad_parity(data).parity_ok());
}
