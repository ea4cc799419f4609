//! Expanding the control store ROM into micro-instructions.
//!
//! The control word is 28 bits wide.  Its fields are packed in an
//! order dictated by the board layout, and several of them are wired
//! to the ROM output lines reversed, rotated or inverted.  Decoding
//! happens once, when the ROM is loaded; the engine only ever sees
//! [`MicroInstruction`] values.
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use base::prelude::*;

use crate::alu::AluOp;
use crate::microop::{AOp, BusOp, ROp, SOp, XOp};

/// Width of a control-store word.
pub const WORD_BITS: u32 = 28;

/// The control-store address at which one machine instruction has
/// finished and the next is about to be fetched.
pub const FETCH_BOUNDARY: u8 = 0x6E;

/// The control-store address forced by power-on preset.
pub const POWER_ON_ADDRESS: u8 = 0xFF;

fn reverse(value: u8, width: u32) -> u8 {
    (0..width).fold(0, |acc, n| acc | (((value >> n) & 1) << (width - 1 - n)))
}

/// Rotates right by one place within `width` bits.
fn rotate_right(value: u8, width: u32) -> u8 {
    ((value >> 1) | ((value & 1) << (width - 1))) & ((1 << width) - 1)
}

struct FieldReader(u32);

impl FieldReader {
    fn take(&mut self, width: u32) -> u8 {
        let v = (self.0 & ((1 << width) - 1)) as u8;
        self.0 >>= width;
        v
    }

    fn flag(&mut self) -> bool {
        self.take(1) != 0
    }
}

/// The fields of a control word, with the wiring undone but before
/// any derived operations are synthesized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Fields {
    pub s_code: u8,
    pub dest_t: bool,
    pub dest_m: bool,
    pub alu_code: u8,
    pub x_code: u8,
    pub r_code: u8,
    pub branch: bool,
    pub transfer_enable: bool,
    pub qualifier_inhibit: bool,
    pub shift_count: u8,
    pub secondary: u8,
    pub primary: u8,
}

impl Fields {
    /// Extracts the fields, least significant first.  The order of
    /// the `take` calls is the field layout.
    pub fn extract(word: u32) -> Fields {
        let mut r = FieldReader(word & ((1 << WORD_BITS) - 1));
        let s_code = reverse(r.take(2), 2);
        let dest_t = !r.flag();
        let dest_m = !r.flag();
        let alu_low = r.take(1);
        let x_code = rotate_right(r.take(3), 3);
        let r_code = reverse(r.take(3), 3);
        let branch = r.flag();
        let transfer_enable = !r.flag();
        let alu_high = reverse(r.take(2), 2);
        let qualifier_inhibit = r.flag();
        let shift_count = r.take(4);
        let secondary = rotate_right(r.take(4), 4);
        let primary = r.take(4);
        Fields {
            s_code,
            dest_t,
            dest_m,
            alu_code: alu_low | (alu_high << 1),
            x_code,
            r_code,
            branch,
            transfer_enable,
            qualifier_inhibit,
            shift_count,
            secondary,
            primary,
        }
    }
}

/// One decoded control-store entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MicroInstruction {
    pub word: u32,
    pub r: ROp,
    pub s: SOp,
    pub x: XOp,
    pub a: AOp,
    pub alu: AluOp,
    pub dest_t: bool,
    pub dest_m: bool,
    pub branch: bool,
    pub qualifier_inhibit: bool,
    /// Number of shifting pulses, less one.  Also selects the
    /// qualifier bit for the branch test and for qualifier inhibit.
    pub shift_count: u8,
    pub secondary: u8,
    pub primary: u8,
    /// True when the shift loop can be skipped without changing the
    /// outcome.
    pub skip_shift: bool,
}

impl MicroInstruction {
    pub fn decode(word: u32) -> MicroInstruction {
        MicroInstruction::from_fields(word, &Fields::extract(word))
    }

    fn from_fields(word: u32, f: &Fields) -> MicroInstruction {
        let mut r = ROp::from_code(f.r_code);
        let s = SOp::from_code(f.s_code);
        let mut x = XOp::from_code(f.x_code);
        let mut a = if f.transfer_enable { AOp::Te } else { AOp::None };

        match (a, r) {
            (AOp::Te, ROp::Utr) => {
                r = ROp::Acu;
                a = AOp::None;
            }
            (AOp::Te, ROp::Ptr) => {
                // TE stays: the arbiter consumes the accumulator it
                // put on the S bus.
                r = ROp::Ios;
            }
            _ => (),
        }
        if r == ROp::Etr && x == XOp::Tte {
            r = ROp::Ett;
            x = XOp::None;
        }

        let skip_shift = !f.dest_t
            && !f.dest_m
            && !f.transfer_enable
            && r.skip_ok()
            && s.skip_ok()
            && x.skip_ok()
            && a.skip_ok();

        MicroInstruction {
            word: word & ((1 << WORD_BITS) - 1),
            r,
            s,
            x,
            a,
            alu: AluOp::from_code(f.alu_code),
            dest_t: f.dest_t,
            dest_m: f.dest_m,
            branch: f.branch,
            qualifier_inhibit: f.qualifier_inhibit,
            shift_count: f.shift_count,
            secondary: f.secondary,
            primary: f.primary,
            skip_shift,
        }
    }

    /// The qualifier (bit of Q) tested by this instruction.
    pub fn qualifier(&self) -> u32 {
        u32::from(self.shift_count)
    }

    /// Computes the successor address.  When the branch test failed
    /// the low bit of the secondary modifier is dropped.
    pub fn next_address(&self, addr: u8, branch_taken: bool) -> u8 {
        let secondary = if branch_taken {
            self.secondary
        } else {
            self.secondary & 0xE
        };
        addr ^ ((self.primary << 4) | secondary)
    }
}

impl Display for MicroInstruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let ops: [&dyn BusOp; 4] = [&self.a, &self.s, &self.r, &self.x];
        for op in ops.iter().filter(|op| !op.is_nop()) {
            write!(f, "{} ", op.name())?;
        }
        write!(f, "{} #{}", self.alu, self.shift_count)?;
        if self.dest_t {
            f.write_str(" >T")?;
        }
        if self.dest_m {
            f.write_str(" >M")?;
        }
        if self.qualifier_inhibit {
            f.write_str(" QI")?;
        }
        if self.branch {
            f.write_str(" BR")?;
        }
        write!(f, " ^{:X}{:X}", self.primary, self.secondary)
    }
}

/// The decoded control store.
#[derive(Clone)]
pub struct ControlStore {
    entries: Vec<MicroInstruction>,
}

impl ControlStore {
    pub fn from_dump(dump: &RomDump) -> ControlStore {
        ControlStore::from_words(dump.words())
    }

    /// Decodes up to 256 words; missing entries decode as zero words.
    pub fn from_words(words: &[u32]) -> ControlStore {
        let entries = (0..ROM_WORDS)
            .map(|i| MicroInstruction::decode(words.get(i).copied().unwrap_or(0)))
            .collect();
        ControlStore { entries }
    }

    pub fn get(&self, addr: u8) -> &MicroInstruction {
        &self.entries[usize::from(addr)]
    }

    pub fn iter(&self) -> impl Iterator<Item = &MicroInstruction> {
        self.entries.iter()
    }
}

impl fmt::Debug for ControlStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let skippable = self.entries.iter().filter(|e| e.skip_shift).count();
        f.debug_struct("ControlStore")
            .field("entries", &self.entries.len())
            .field("skippable", &skippable)
            .finish()
    }
}
