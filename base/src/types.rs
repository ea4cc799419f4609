//! Bus-width types.  Values on a physical bus cannot be out of range,
//! so these types mask on construction instead of rejecting.
use std::fmt::{self, Debug, Display, Formatter, Octal};

use serde::Serialize;

/// A memory address.  The M and P registers are 16 bits wide but only
/// the low 15 bits reach the memory address lines, so there are
/// 32,768 addressable cells.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Address(u16);

impl Address {
    pub const BITS: u32 = 15;
    pub const MASK: u16 = (1 << Self::BITS) - 1;
    pub const ZERO: Address = Address(0);
    pub const MAX: Address = Address(Self::MASK);
    /// Number of distinct addresses.
    pub const SPAN: usize = 1 << Self::BITS;

    /// Takes the low 15 bits of `value`.
    pub const fn masked(value: u16) -> Address {
        Address(value & Self::MASK)
    }

    pub const fn value(&self) -> u16 {
        self.0
    }

    pub fn index(&self) -> usize {
        usize::from(self.0)
    }

    pub fn successor(&self) -> Address {
        Address::masked(self.0.wrapping_add(1))
    }
}

impl From<u16> for Address {
    fn from(value: u16) -> Address {
        Address::masked(value)
    }
}

impl From<Address> for u16 {
    fn from(a: Address) -> u16 {
        a.0
    }
}

impl Octal for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Octal::fmt(&self.0, f)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:05o}", self.0)
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:05o})", self.0)
    }
}

/// A peripheral select code.  Four address lines run to the I/O
/// backplane, so codes 1 to 15 name peripherals and 0 means that
/// nothing is addressed.  Several peripherals may answer to the same
/// select code.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SelectCode(u8);

impl SelectCode {
    pub const MASK: u8 = 0xF;
    pub const NONE: SelectCode = SelectCode(0);
    pub const MAX: SelectCode = SelectCode(Self::MASK);

    pub const fn masked(value: u8) -> SelectCode {
        SelectCode(value & Self::MASK)
    }

    pub const fn value(&self) -> u8 {
        self.0
    }

    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// The bit belonging to this select code in the 15-bit service
    /// strobe vector.  Select code `n` owns bit `n - 1`.
    pub fn strobe_bit(&self) -> Option<u16> {
        if self.is_none() {
            None
        } else {
            Some(1 << (self.0 - 1))
        }
    }

    /// Iterates over all the select codes a peripheral can answer
    /// to, in ascending order.
    pub fn all() -> impl Iterator<Item = SelectCode> {
        (1..=Self::MASK).map(SelectCode)
    }
}

impl From<u8> for SelectCode {
    fn from(value: u8) -> SelectCode {
        SelectCode::masked(value)
    }
}

impl Display for SelectCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for SelectCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SC{}", self.0)
    }
}

#[test]
fn test_address_masks_top_bit() {
    assert_eq!(Address::masked(0x8000), Address::ZERO);
    assert_eq!(Address::masked(0xFFFF), Address::MAX);
    assert_eq!(Address::MAX.successor(), Address::ZERO);
    assert_eq!(Address::SPAN, 32768);
}

#[test]
fn test_address_display_is_octal() {
    assert_eq!(Address::masked(0o17_777).to_string(), "17777");
    assert_eq!(format!("{:?}", Address::masked(8)), "Address(00010)");
}

#[test]
fn test_select_code_strobe_bit() {
    assert_eq!(SelectCode::NONE.strobe_bit(), None);
    assert_eq!(SelectCode::masked(1).strobe_bit(), Some(1));
    assert_eq!(SelectCode::masked(15).strobe_bit(), Some(1 << 14));
    // Only four select lines exist.
    assert_eq!(SelectCode::masked(0x1C), SelectCode::masked(12));
    assert_eq!(SelectCode::all().count(), 15);
}

#[cfg(test)]
mod proptests {
    use super::Address;
    use test_strategy::proptest;

    #[proptest]
    fn masking_is_idempotent(value: u16) {
        let a = Address::masked(value);
        assert_eq!(Address::masked(a.value()), a);
        assert!(a <= Address::MAX);
    }

    #[proptest]
    fn successor_wraps_within_span(value: u16) {
        let a = Address::masked(value);
        assert!(a.successor().index() < Address::SPAN);
        assert_eq!(a.successor().value(), (a.value() + 1) & Address::MASK);
    }
}
