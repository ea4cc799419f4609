//! Tracing of executed micro-instructions.
//!
//! The engine hands a [`TraceLine`] to the sink before executing each
//! micro-instruction.  Formatting happens only if the sink displays
//! the line.
use std::fmt::{self, Display, Formatter};

use crate::decode::MicroInstruction;
use crate::registers::RegisterSnapshot;

/// Receives trace output from the engine.  Both methods default to
/// doing nothing, so a sink implements only what it wants.
pub trait TraceSink {
    /// Called once per micro-instruction.
    fn micro(&mut self, _line: &TraceLine<'_>) {}

    /// Called at the fetch boundary, with the program counter and
    /// the instruction register.
    fn instruction(&mut self, _p: u16, _q: u16) {}
}

/// The state seen by one micro-instruction.
#[derive(Debug, Clone, Copy)]
pub struct TraceLine<'a> {
    pub address: u8,
    pub registers: RegisterSnapshot,
    pub instruction: &'a MicroInstruction,
}

impl Display for TraceLine<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}  {} | {}",
            self.address, self.registers, self.instruction
        )
    }
}
