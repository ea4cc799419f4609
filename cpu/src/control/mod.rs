//! Emulates the control unit of the calculator: the microcode engine.
//!
//! Each call to [`ControlUnit::step`] executes one micro-instruction
//! from the control store.  Within this emulator, the control unit
//! performs the following functions:
//!
//! - Wire registers onto the R and S buses as the bus operations direct
//! - Run the bit-serial shift loop through the ALU
//! - Commit decimal results and the carry flip-flops
//! - Compute the next control-store address
//!
//! Memory and the I/O board are owned elsewhere and lent to the
//! engine for the duration of a step.
use std::fmt::{self, Debug, Formatter};

use tracing::{event, Level};

use base::prelude::*;

use crate::alu::{Alu, AluTables};
use crate::decode::{ControlStore, MicroInstruction, FETCH_BOUNDARY, POWER_ON_ADDRESS};
use crate::io::IoUnit;
use crate::memory::{MemoryUnit, WriteOutcome};
use crate::microop::{AOp, ROp, SOp, XOp};
use crate::registers::{Bus, Driver, Reg, RegisterSnapshot, Registers, Source, HOLD_QUALIFIER};

mod trace;


pub use trace::{TraceLine, TraceSink};

/// What happened during one micro-instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cycle {
    /// The control-store address which was executed.
    pub address: u8,
    pub next: u8,
    /// Shifting pulses actually run (not counting the terminating
    /// pass).
    pub pulses: u32,
    pub branch_taken: bool,
    /// The new state of the display blanking latch, if it changed.
    pub blanking: Option<bool>,
    /// A watched memory cell written by this instruction.
    pub watched: Option<(Address, u16)>,
}

pub struct ControlUnit {
    store: ControlStore,
    regs: Registers,
    alu: Alu,
    address: u8,
    shift_skip: bool,
    cycles: u64,
}

impl ControlUnit {
    pub fn new(store: ControlStore, tables: AluTables, shift_skip: bool) -> ControlUnit {
        ControlUnit {
            store,
            regs: Registers::new(),
            alu: Alu::new(tables),
            address: POWER_ON_ADDRESS,
            shift_skip,
            cycles: 0,
        }
    }

    /// Forces the control-store address to the power-on entry point
    /// and clears the registers and flip-flops.
    pub fn power_on_preset(&mut self) {
        event!(Level::INFO, "power-on preset");
        self.regs = Registers::new();
        self.address = POWER_ON_ADDRESS;
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    /// True when the next micro-instruction starts a machine
    /// instruction.
    pub fn at_fetch_boundary(&self) -> bool {
        self.address == FETCH_BOUNDARY
    }

    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    pub fn snapshot(&self) -> RegisterSnapshot {
        self.regs.snapshot()
    }

    pub fn store(&self) -> &ControlStore {
        &self.store
    }

    pub fn set_shift_skip(&mut self, on: bool) {
        self.shift_skip = on;
    }

    /// Micro-instructions executed since construction.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Executes the micro-instruction at the current address.
    pub fn step(
        &mut self,
        mem: &mut MemoryUnit,
        io: &IoUnit,
        trace: Option<&mut dyn TraceSink>,
    ) -> Cycle {
        let address = self.address;
        let mi = *self.store.get(address);
        if let Some(sink) = trace {
            if address == FETCH_BOUNDARY {
                sink.instruction(self.regs.get(Reg::P), self.regs.get(Reg::Q));
            }
            sink.micro(&TraceLine {
                address,
                registers: self.regs.snapshot(),
                instruction: &mi,
            });
        }
        let blanked = self.regs.blanked();

        if mi.a == AOp::Te {
            let acc = self.regs.active();
            self.regs.claim(Bus::S, Driver::Reg(acc));
        }
        self.run_s_op(&mi);
        self.run_r_op(&mi, mem, io);
        if mi.dest_t {
            self.regs.arm(Reg::T, Source::TBus);
        }
        if mi.dest_m {
            self.regs.arm(Reg::M, Source::TBus);
        }
        let watched = self.run_x_op(&mi, mem);

        let decimal = mi.alu.is_decimal();
        let unit = mi.r.is_unit_source();
        let mut remaining = self.trip_count(&mi);
        let prior = if decimal {
            self.regs.decimal_carry
        } else {
            self.regs.carry
        };
        self.alu.init(prior, unit, decimal);

        let mut pulses = 0;
        let branch_taken = loop {
            let r = self.regs.bus_bit(Bus::R);
            let s = self.regs.bus_bit(Bus::S);
            let out = self.alu.exec(mi.alu, r, s);
            if remaining == 0 {
                let taken = !mi.branch || self.regs.q_bit(mi.qualifier());
                if mi.x == XOp::Tq6 {
                    self.regs.set_q_bit(HOLD_QUALIFIER, out.bit);
                }
                if !decimal {
                    self.regs.carry = self.alu.tentative_carry();
                }
                break taken;
            }
            self.regs.pulse(out.bit, r, s);
            self.alu.clock();
            if !decimal {
                self.regs.carry = self.alu.carry();
            }
            remaining -= 1;
            pulses += 1;
        };

        // A loop which never pulsed produced no digit.
        if decimal && pulses > 0 {
            let (digit, carry) = self.alu.decimal_result();
            if !unit {
                let acc = self.regs.active();
                let value = self.regs.get(acc);
                self.regs
                    .set(acc, (value & 0x0FFF) | (u16::from(digit) << 12));
            }
            self.regs.decimal_carry = carry;
        }

        let next = mi.next_address(address, branch_taken);
        self.regs.release();
        self.address = next;
        self.cycles += 1;

        let now_blanked = self.regs.blanked();
        let cycle = Cycle {
            address,
            next,
            pulses,
            branch_taken,
            blanking: (now_blanked != blanked).then_some(now_blanked),
            watched,
        };
        event!(
            Level::TRACE,
            "{:02X} -> {:02X} after {} pulses ({})",
            address,
            next,
            pulses,
            mi
        );
        cycle
    }

    fn run_s_op(&mut self, mi: &MicroInstruction) {
        match mi.s {
            SOp::None => (),
            SOp::Ats => {
                let acc = self.regs.active();
                self.regs.claim(Bus::S, Driver::Reg(acc));
            }
            SOp::Tts => {
                self.regs.claim(Bus::S, Driver::Reg(Reg::T));
            }
            SOp::Sab => {
                self.regs.b_selected = !self.regs.b_selected;
            }
        }
    }

    fn run_r_op(&mut self, mi: &MicroInstruction, mem: &MemoryUnit, io: &IoUnit) {
        match mi.r {
            ROp::None => (),
            ROp::Ptr => {
                self.regs.claim(Bus::R, Driver::Reg(Reg::P));
            }
            ROp::Utr => {
                self.regs.claim(Bus::R, Driver::Unit);
            }
            ROp::Ttr => {
                self.regs.claim(Bus::R, Driver::Reg(Reg::T));
            }
            ROp::Qtr => {
                self.regs.claim(Bus::R, Driver::Reg(Reg::Q));
            }
            ROp::Rdm => {
                let addr = Address::masked(self.regs.get(Reg::M));
                self.regs.set(Reg::T, mem.read(addr));
                self.regs.claim(Bus::R, Driver::Reg(Reg::T));
            }
            ROp::Etr => {
                if self.regs.claim(Bus::R, Driver::Reg(Reg::E)) {
                    self.regs.arm(Reg::E, Source::SBus);
                }
            }
            ROp::Ett => {
                if self.regs.claim(Bus::R, Driver::Reg(Reg::E)) {
                    self.regs.arm(Reg::E, Source::TBus);
                }
            }
            ROp::Xtr => {
                let acc = self.regs.inactive();
                self.regs.claim(Bus::R, Driver::Reg(acc));
            }
            ROp::Acu => {
                self.regs.claim(Bus::R, Driver::Unit);
                let acc = self.regs.active();
                self.regs.claim(Bus::S, Driver::Reg(acc));
            }
            ROp::Ios => io.exec(&mut self.regs, &mut self.alu),
        }
    }

    /// Returns the watched cell written by WTM, if any.
    fn run_x_op(
        &mut self,
        mi: &MicroInstruction,
        mem: &mut MemoryUnit,
    ) -> Option<(Address, u16)> {
        let target = match mi.x {
            XOp::None | XOp::Tq6 => return None,
            XOp::Tta => self.regs.active(),
            XOp::Ttp => Reg::P,
            XOp::Ttq => Reg::Q,
            XOp::Tte => Reg::E,
            XOp::Ttb => Reg::Dsp,
            XOp::Wtm => {
                let addr = Address::masked(self.regs.get(Reg::M));
                let value = self.regs.get(Reg::T);
                return match mem.write(addr, value) {
                    WriteOutcome::Watched => Some((addr, value)),
                    WriteOutcome::Stored | WriteOutcome::ReadOnly => None,
                };
            }
        };
        self.regs.arm(target, Source::TBus);
        None
    }

    /// The number of shifting pulses for `mi`, given the current
    /// state of Q.
    fn trip_count(&self, mi: &MicroInstruction) -> u32 {
        let held = mi.r == ROp::Ios && self.regs.q_bit(HOLD_QUALIFIER);
        let inhibited = mi.qualifier_inhibit && !self.regs.q_bit(mi.qualifier());
        // The decimal commit reads what the loop leaves in the ALU, so
        // a decimal instruction always runs it.
        let skipped = self.shift_skip && mi.skip_shift && !mi.alu.is_decimal();
        if held || inhibited || skipped {
            0
        } else {
            u32::from(mi.shift_count) + 1
        }
    }
}

impl Debug for ControlUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlUnit")
            .field("address", &format_args!("{:02X}", self.address))
            .field("regs", &self.regs)
            .field("shift_skip", &self.shift_skip)
            .field("cycles", &self.cycles)
            .finish()
    }
}
