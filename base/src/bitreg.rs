//! The bit-serial shift register.
//!
//! Every register on the CPU board is a recirculating shift register
//! clocked once per shift-loop pulse.  A pulse has two phases.  In the
//! first phase each enabled register samples ("latches") the bit
//! presented by its source.  In the second phase every enabled
//! register shifts right by one place, and the latched bit enters at
//! the top.  Callers must run the first phase for every register in a
//! group before running the second phase for any of them; otherwise a
//! register wired to a peer would see the peer's already-shifted
//! value.
//!
//! Which bit a register is wired to is not the business of this
//! module.  The caller works out the source bit (the register's own
//! low bit, one of the buses, or another register) and hands it to
//! [`ShiftRegister::load_input`].
use std::fmt::{self, Debug, Formatter};

use serde::Serialize;

/// Restricts which bits of a register move on a shift.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ShiftKind {
    /// The whole register rotates.
    Full,
    /// Only the bit at this position changes; it takes the latched
    /// input.  The display-blanking tap is built this way.
    SingleBit(u32),
    /// In byte mode only bits 0-7 rotate and the upper bits hold
    /// still.  Outside byte mode the whole register rotates.  Byte
    /// mode is switched at run time for byte-wide I/O transfers.
    LowByte,
}

#[derive(Clone, Serialize)]
pub struct ShiftRegister {
    name: &'static str,
    width: u32,
    value: u16,
    kind: ShiftKind,
    byte_mode: bool,
    #[serde(skip)]
    enabled: bool,
    #[serde(skip)]
    latched: bool,
}

impl ShiftRegister {
    /// Creates a register which rotates as a whole.
    ///
    /// # Panics
    ///
    /// Panics if `width` is 0 or more than 16.  Register widths are
    /// fixed properties of the hardware, so this is a programming
    /// error.
    pub fn new(name: &'static str, width: u32) -> ShiftRegister {
        ShiftRegister::with_kind(name, width, ShiftKind::Full)
    }

    /// Creates a register in which only the bit at `position` moves.
    pub fn single_bit(name: &'static str, width: u32, position: u32) -> ShiftRegister {
        assert!(position < width, "tap position must be inside the register");
        ShiftRegister::with_kind(name, width, ShiftKind::SingleBit(position))
    }

    /// Creates a register which can be switched into byte mode.
    pub fn low_byte(name: &'static str, width: u32) -> ShiftRegister {
        assert!(width >= 8, "a byte-wide register needs at least 8 bits");
        ShiftRegister::with_kind(name, width, ShiftKind::LowByte)
    }

    fn with_kind(name: &'static str, width: u32, kind: ShiftKind) -> ShiftRegister {
        assert!((1..=16).contains(&width), "register width out of range");
        ShiftRegister {
            name,
            width,
            value: 0,
            kind,
            byte_mode: false,
            enabled: false,
            latched: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn kind(&self) -> ShiftKind {
        self.kind
    }

    pub fn mask(&self) -> u16 {
        if self.width == 16 {
            u16::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    pub fn value(&self) -> u16 {
        self.value
    }

    /// Parallel load.  Bits above the register's width are dropped.
    pub fn set(&mut self, value: u16) {
        self.value = value & self.mask();
    }

    pub fn bit(&self, n: u32) -> bool {
        n < self.width && (self.value >> n) & 1 != 0
    }

    pub fn set_bit(&mut self, n: u32, on: bool) {
        if n < self.width {
            if on {
                self.value |= 1 << n;
            } else {
                self.value &= !(1 << n);
            }
        }
    }

    /// The bit this register presents to whatever it drives.  For a
    /// single-bit tap that is the tap itself, otherwise it is bit 0.
    pub fn output_bit(&self) -> bool {
        match self.kind {
            ShiftKind::SingleBit(pos) => self.bit(pos),
            ShiftKind::Full | ShiftKind::LowByte => self.bit(0),
        }
    }

    pub fn shift_enable(&mut self, on: bool) {
        self.enabled = on;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_byte_mode(&mut self, on: bool) {
        self.byte_mode = on;
    }

    pub fn byte_mode(&self) -> bool {
        self.byte_mode
    }

    /// First phase of a pulse: remember `bit` if shifting is enabled.
    pub fn load_input(&mut self, bit: bool) {
        if self.enabled {
            self.latched = bit;
        }
    }

    /// Second phase of a pulse: move right by one place, inserting
    /// the bit remembered by [`ShiftRegister::load_input`].
    pub fn shift(&mut self) {
        if !self.enabled {
            return;
        }
        let incoming = u16::from(self.latched);
        self.value = match self.kind {
            ShiftKind::SingleBit(pos) => (self.value & !(1 << pos)) | (incoming << pos),
            ShiftKind::LowByte if self.byte_mode => {
                let low = ((self.value & 0xFF) >> 1) | (incoming << 7);
                (self.value & !0xFF) | low
            }
            ShiftKind::Full | ShiftKind::LowByte => {
                (self.value >> 1) | (incoming << (self.width - 1))
            }
        } & self.mask();
    }

    /// Disables shifting.  Run at the end of every micro-instruction.
    pub fn release(&mut self) {
        self.enabled = false;
    }
}

impl Debug for ShiftRegister {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:0w$X}", self.name, self.value, w = (self.width as usize + 3) / 4)?;
        if self.enabled {
            f.write_str("*")?;
        }
        Ok(())
    }
}
