//! The register file of the CPU board and the two internal buses
//! which feed the ALU.
use std::fmt::{self, Debug, Formatter};

use serde::Serialize;

use base::prelude::*;

/// The engine-owned registers.  IO and AUX belong to the I/O
/// arbiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Reg {
    A,
    B,
    E,
    M,
    P,
    Q,
    T,
    /// The display-blanking tap.
    Dsp,
}

impl Reg {
    pub const ALL: [Reg; 8] = [Reg::A, Reg::B, Reg::E, Reg::M, Reg::P, Reg::Q, Reg::T, Reg::Dsp];

    const fn index(self) -> usize {
        self as usize
    }
}

/// Bit 3 of DSP blanks the display.
pub const BLANKING_BIT: u32 = 3;

/// Q bit 6 is the hold qualifier shared with the I/O arbiter.
pub const HOLD_QUALIFIER: u32 = 6;

/// Where a register takes its input bit from on each pulse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    /// Its own output bit, i.e. rotate in place.
    Own,
    RBus,
    SBus,
    /// The ALU output.
    TBus,
    Reg(Reg),
}

/// What is driving the R or S bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Driver {
    Reg(Reg),
    /// The serial unit constant.  The bus itself reads 0; the 1 is
    /// injected by the ALU on the first pulse.
    Unit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bus {
    R,
    S,
}

/// A register's shift control, saved across a borrowed use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShiftControl {
    enabled: bool,
    source: Source,
}

#[derive(Clone)]
pub struct Registers {
    regs: [ShiftRegister; 8],
    sources: [Source; 8],
    r_bus: Option<Driver>,
    s_bus: Option<Driver>,
    /// The binary carry flip-flop.
    pub carry: bool,
    /// The decimal carry flip-flop.
    pub decimal_carry: bool,
    /// The accumulator select flip-flop; clear selects A.
    pub b_selected: bool,
}

impl Registers {
    pub fn new() -> Registers {
        Registers {
            regs: [
                ShiftRegister::new("A", 16),
                ShiftRegister::new("B", 16),
                ShiftRegister::new("E", 4),
                ShiftRegister::new("M", 16),
                ShiftRegister::new("P", 16),
                ShiftRegister::new("Q", 16),
                ShiftRegister::new("T", 16),
                ShiftRegister::single_bit("DSP", 4, BLANKING_BIT),
            ],
            sources: [Source::Own; 8],
            r_bus: None,
            s_bus: None,
            carry: false,
            decimal_carry: false,
            b_selected: false,
        }
    }

    pub fn reg(&self, r: Reg) -> &ShiftRegister {
        &self.regs[r.index()]
    }

    pub fn reg_mut(&mut self, r: Reg) -> &mut ShiftRegister {
        &mut self.regs[r.index()]
    }

    pub fn get(&self, r: Reg) -> u16 {
        self.reg(r).value()
    }

    pub fn set(&mut self, r: Reg, value: u16) {
        self.reg_mut(r).set(value)
    }

    /// The accumulator chosen by the A/B flip-flop.
    pub fn active(&self) -> Reg {
        if self.b_selected {
            Reg::B
        } else {
            Reg::A
        }
    }

    pub fn inactive(&self) -> Reg {
        if self.b_selected {
            Reg::A
        } else {
            Reg::B
        }
    }

    pub fn q_bit(&self, n: u32) -> bool {
        self.reg(Reg::Q).bit(n)
    }

    pub fn set_q_bit(&mut self, n: u32, on: bool) {
        self.reg_mut(Reg::Q).set_bit(n, on)
    }

    pub fn blanked(&self) -> bool {
        self.reg(Reg::Dsp).bit(BLANKING_BIT)
    }

    pub fn source(&self, r: Reg) -> Source {
        self.sources[r.index()]
    }

    /// Enables shifting of `r`, taking its input from `source`.
    pub fn arm(&mut self, r: Reg, source: Source) {
        self.sources[r.index()] = source;
        self.reg_mut(r).shift_enable(true);
    }

    pub fn shift_control(&self, r: Reg) -> ShiftControl {
        ShiftControl {
            enabled: self.reg(r).is_enabled(),
            source: self.source(r),
        }
    }

    pub fn restore_shift_control(&mut self, r: Reg, saved: ShiftControl) {
        self.sources[r.index()] = saved.source;
        self.reg_mut(r).shift_enable(saved.enabled);
    }

    pub fn driver(&self, bus: Bus) -> Option<Driver> {
        match bus {
            Bus::R => self.r_bus,
            Bus::S => self.s_bus,
        }
    }

    /// Claims `bus` for `driver` unless something already drives it.
    /// A register which takes the bus rotates while it drives it.
    pub fn claim(&mut self, bus: Bus, driver: Driver) -> bool {
        let slot = match bus {
            Bus::R => &mut self.r_bus,
            Bus::S => &mut self.s_bus,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(driver);
        if let Driver::Reg(r) = driver {
            self.arm(r, Source::Own);
        }
        true
    }

    /// The bit currently on `bus`.  A bus nobody drives reads 0.
    pub fn bus_bit(&self, bus: Bus) -> bool {
        match self.driver(bus) {
            Some(Driver::Reg(r)) => self.reg(r).output_bit(),
            Some(Driver::Unit) | None => false,
        }
    }

    /// Runs one two-phase pulse: every enabled register latches its
    /// input, then every enabled register shifts.
    pub fn pulse(&mut self, t: bool, r: bool, s: bool) {
        let mut inputs = [false; 8];
        for reg in Reg::ALL {
            if self.reg(reg).is_enabled() {
                inputs[reg.index()] = match self.source(reg) {
                    Source::Own => self.reg(reg).output_bit(),
                    Source::RBus => r,
                    Source::SBus => s,
                    Source::TBus => t,
                    Source::Reg(other) => self.reg(other).output_bit(),
                };
            }
        }
        for reg in Reg::ALL {
            self.regs[reg.index()].load_input(inputs[reg.index()]);
        }
        for reg in self.regs.iter_mut() {
            reg.shift();
        }
    }

    /// Returns every register to rotate-in-place with shifting off,
    /// and clears both buses.
    pub fn release(&mut self) {
        for reg in self.regs.iter_mut() {
            reg.release();
        }
        self.sources = [Source::Own; 8];
        self.r_bus = None;
        self.s_bus = None;
    }

    pub fn snapshot(&self) -> RegisterSnapshot {
        RegisterSnapshot {
            a: self.get(Reg::A),
            b: self.get(Reg::B),
            e: self.get(Reg::E),
            m: self.get(Reg::M),
            p: self.get(Reg::P),
            q: self.get(Reg::Q),
            t: self.get(Reg::T),
            dsp: self.get(Reg::Dsp),
            carry: self.carry,
            decimal_carry: self.decimal_carry,
            b_selected: self.b_selected,
        }
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Registers {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.regs.iter()).finish()?;
        write!(
            f,
            " C={} DC={} AB={}",
            u8::from(self.carry),
            u8::from(self.decimal_carry),
            if self.b_selected { 'B' } else { 'A' }
        )
    }
}

/// The programmer-visible state, for traces, state dumps and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RegisterSnapshot {
    pub a: u16,
    pub b: u16,
    pub e: u16,
    pub m: u16,
    pub p: u16,
    pub q: u16,
    pub t: u16,
    pub dsp: u16,
    pub carry: bool,
    pub decimal_carry: bool,
    pub b_selected: bool,
}

impl fmt::Display for RegisterSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "A={:04X} B={:04X} E={:X} M={:04X} P={:04X} Q={:04X} T={:04X} C={} DC={} AB={}",
            self.a,
            self.b,
            self.e,
            self.m,
            self.p,
            self.q,
            self.t,
            u8::from(self.carry),
            u8::from(self.decimal_carry),
            if self.b_selected { 'B' } else { 'A' }
        )
    }
}
