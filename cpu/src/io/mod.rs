//! This module simulates the I/O board: the arbiter which decodes I/O
//! micro-instructions held in the Q register, the service request
//! (interrupt) logic, and the contract peripherals implement.
//!
//! ## Q register layout for I/O instructions
//!
//! | Enable | H/C   | Micro-instruction | Hold (Q6) | unused | Select code |
//! | ------ | ----- | ----------------- | --------- | ------ | ----------- |
//! | 12     | 11    | 7-10              | 6         | 5      | 0-4         |
//! |(1 bit) |(1 bit)| (4 bits)          | (1 bit)   |        | (5 bits)    |
//!
//! Only four select lines reach the backplane, so bit 4 of the select
//! code field is ignored.
//!
//! ## Micro-instructions
//!
//! 0: STF, set flag (ready)
//! 1: SFC, skip (set C) if flag clear
//! 2: STC, set control and run an output handshake
//! 3: CLC, clear control
//! 4: SFS, skip (set C) if flag set
//! 5: LI8, load 8 bits from the bus
//! 6: LI16, load 16 bits from the bus
//! 7: OT8, output 8 bits
//! 8: OT16, output 16 bits
//! 9: EOW, end of service
//! 10-15: no-op
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use serde::Serialize;

use base::prelude::*;

mod arbiter;
mod dev_loopback;
mod dev_printer;
mod directory;
mod quirks;
mod registry;
mod worker;

#[cfg(test)]
mod tests;

pub use arbiter::{IoHandle, IoSnapshot, IoUnit, Latches};
pub use dev_loopback::Loopback;
pub use dev_printer::Printer;
pub use directory::{AttachedDevice, DeviceDirectory, DeviceId};
pub use quirks::{DeviceClass, Model, ModelProfile, Quirk, QuirkAction};
pub use registry::{DeviceContext, DeviceRegistry, DeviceSpec};

/// Select code field of Q.
pub const Q_SELECT_MASK: u16 = 0x1F;
/// First bit of the micro-instruction field of Q.
pub const Q_OP_SHIFT: u32 = 7;
pub const Q_OP_MASK: u16 = 0xF;
/// Hold/clear: drop the ready flag after the micro-instruction.
pub const Q_HOLD_CLEAR: u16 = 1 << 11;
/// I/O enable.  When clear, IOS services interrupts instead.
pub const Q_ENABLE: u16 = 1 << 12;

/// Width of the strobe vector.
pub const STROBE_MASK: u16 = 0x7FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoOp {
    Stf,
    Sfc,
    Stc,
    Clc,
    Sfs,
    Li8,
    Li16,
    Ot8,
    Ot16,
    Eow,
    Nop(u8),
}

impl IoOp {
    pub const fn from_code(code: u8) -> IoOp {
        match code & 0xF {
            0 => IoOp::Stf,
            1 => IoOp::Sfc,
            2 => IoOp::Stc,
            3 => IoOp::Clc,
            4 => IoOp::Sfs,
            5 => IoOp::Li8,
            6 => IoOp::Li16,
            7 => IoOp::Ot8,
            8 => IoOp::Ot16,
            9 => IoOp::Eow,
            n => IoOp::Nop(n),
        }
    }

    pub const fn code(&self) -> u8 {
        match self {
            IoOp::Stf => 0,
            IoOp::Sfc => 1,
            IoOp::Stc => 2,
            IoOp::Clc => 3,
            IoOp::Sfs => 4,
            IoOp::Li8 => 5,
            IoOp::Li16 => 6,
            IoOp::Ot8 => 7,
            IoOp::Ot16 => 8,
            IoOp::Eow => 9,
            IoOp::Nop(n) => *n,
        }
    }
}

impl Display for IoOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IoOp::Stf => "STF",
            IoOp::Sfc => "SFC",
            IoOp::Stc => "STC",
            IoOp::Clc => "CLC",
            IoOp::Sfs => "SFS",
            IoOp::Li8 => "LI8",
            IoOp::Li16 => "LI16",
            IoOp::Ot8 => "OT8",
            IoOp::Ot16 => "OT16",
            IoOp::Eow => "EOW",
            IoOp::Nop(_) => "NOP",
        })
    }
}

/// An I/O micro-instruction as found in Q.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoInstruction {
    pub op: IoOp,
    pub select_code: SelectCode,
    pub hold_clear: bool,
    pub enable: bool,
}

impl IoInstruction {
    pub fn from_q(q: u16) -> IoInstruction {
        IoInstruction {
            // Truncation is intended; both fields are narrower than u8.
            op: IoOp::from_code(((q >> Q_OP_SHIFT) & Q_OP_MASK) as u8),
            select_code: SelectCode::masked((q & Q_SELECT_MASK) as u8),
            hold_clear: q & Q_HOLD_CLEAR != 0,
            enable: q & Q_ENABLE != 0,
        }
    }

    pub fn to_q(&self) -> u16 {
        u16::from(self.select_code.value())
            | (u16::from(self.op.code()) << Q_OP_SHIFT)
            | if self.hold_clear { Q_HOLD_CLEAR } else { 0 }
            | if self.enable { Q_ENABLE } else { 0 }
    }
}

impl Display for IoInstruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.select_code)?;
        if self.hold_clear {
            f.write_str(" H/C")?;
        }
        Ok(())
    }
}

/// The lines of the peripheral bus other than the select code.  The
/// arbiter owns them; a peripheral sees them only during a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusLines {
    pub data: u16,
    /// The status line.  While it is held SFS and SFC find the flag
    /// set.
    pub status: bool,
    /// A peripheral sets this to request service.
    pub flag: bool,
}

/// The contract between the arbiter and a peripheral.
///
/// `output` and `input` start a handshake and return true while the
/// peripheral keeps its busy line asserted.  A busy peripheral is
/// given `handshake_delay()` of (simulated or real) time, after which
/// `complete` is called and the busy line drops.
pub trait Device: Send {
    fn name(&self) -> &str;

    fn output(&mut self, bus: &mut BusLines) -> bool;

    fn input(&mut self, bus: &mut BusLines) -> bool;

    /// The mechanical or electrical delay of one handshake.
    fn handshake_delay(&self) -> Duration {
        Duration::ZERO
    }

    fn complete(&mut self, _bus: &mut BusLines) {}

    /// Called on power-on preset.
    fn reset(&mut self) {}
}

#[test]
fn test_io_instruction_fields() {
    let q = 0b1_1_1000_0_0_01111;
    let ins = IoInstruction::from_q(q);
    assert_eq!(ins.op, IoOp::Ot16);
    assert_eq!(ins.select_code, SelectCode::masked(15));
    assert!(ins.hold_clear);
    assert!(ins.enable);
    assert_eq!(ins.to_q(), q);
    assert_eq!(ins.to_string(), "OT16 15 H/C");
}

#[test]
fn test_io_op_codes() {
    for code in 0..16 {
        assert_eq!(IoOp::from_code(code).code(), code);
    }
    assert_eq!(IoOp::from_code(12), IoOp::Nop(12));
    // Select code bit 4 is not wired.
    assert_eq!(
        IoInstruction::from_q(0x1C).select_code,
        SelectCode::masked(12)
    );
}
