//! This crate emulates the CPU board shared by the HP 9810, 9820 and
//! 9830 calculators: the microcode engine, the bit-serial ALU with its
//! decimal correction, and the I/O board which talks to peripherals.
#![crate_name = "cpu"]

mod alu;
mod clock;
mod config;
mod control;
mod decode;
mod error;
mod event;
pub mod io;
mod machine;
mod memory;
mod microop;
mod registers;
mod sleep;
mod timing;

pub use alu::{
    reference_alu_dump, reference_bcd_dump, Alu, AluOp, AluOutput, AluTableError, AluTables,
    ALU_ROM_WIDTH, BCD_ROM_WIDTH,
};
pub use clock::{BasicClock, Clock};
pub use config::{MachineConfig, TraceLevel};
pub use control::{ControlUnit, Cycle, TraceLine, TraceSink};
pub use decode::{ControlStore, Fields, MicroInstruction, FETCH_BOUNDARY, POWER_ON_ADDRESS, WORD_BITS};
pub use error::{ConfigError, LoadError};
pub use event::OutputEvent;
pub use machine::{
    Calculator, MachineSnapshot, MemoryImage, RomSet, RomSpec, StopReason, YIELD_INTERVAL,
};
pub use memory::{CellKind, LoadFailure, MemoryCell, MemoryUnit, WriteOutcome};
pub use microop::{AOp, BusOp, ROp, SOp, XOp};
pub use registers::{
    Bus, Driver, Reg, RegisterSnapshot, Registers, ShiftControl, Source, BLANKING_BIT,
    HOLD_QUALIFIER,
};
pub use sleep::MinimalSleeper;
pub use timing::{calibrate, CancelToken, SleepCalibration, TimingMode};
