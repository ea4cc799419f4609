//! The bus operations named by the fields of a micro-instruction.
//!
//! Each R, S, X and A code selects one operation.  An operation is
//! described by two facts: the name under which it appears in a trace
//! and whether an instruction using it may skip the bit-serial shift
//! loop.  What an operation actually does to the registers is the
//! engine's business (see `control`).

use serde::Serialize;

/// The two static facts about a bus operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpInfo {
    pub name: &'static str,
    /// True if this operation does nothing which needs the shift
    /// loop to run.
    pub skip_ok: bool,
}

const fn info(name: &'static str, skip_ok: bool) -> OpInfo {
    OpInfo { name, skip_ok }
}

pub trait BusOp {
    fn info(&self) -> OpInfo;

    fn name(&self) -> &'static str {
        self.info().name
    }

    fn skip_ok(&self) -> bool {
        self.info().skip_ok
    }

    /// True for the "no operation" code of the field.
    fn is_nop(&self) -> bool {
        self.name().is_empty()
    }
}

/// Operations which drive the R (source) bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ROp {
    None,
    /// P drives R and rotates.
    Ptr,
    /// The serial unit constant: a 1 on the first pulse only.
    Utr,
    /// T drives R and rotates.
    Ttr,
    /// Q drives R and rotates.
    Qtr,
    /// T is loaded from memory at M, then drives R and rotates.
    Rdm,
    /// E drives R; E reloads from the S bus.
    Etr,
    /// The inactive accumulator drives R and rotates.
    Xtr,
    /// Derived: unit constant on R with the active accumulator on S.
    Acu,
    /// Derived: I/O start.  Hands the instruction to the arbiter.
    Ios,
    /// Derived: E drives R; E reloads from the T bus.
    Ett,
}

impl ROp {
    /// Maps the (already bit-reversed) 3-bit R code.
    pub const fn from_code(code: u8) -> ROp {
        match code & 7 {
            0 => ROp::None,
            1 => ROp::Ptr,
            2 => ROp::Utr,
            3 => ROp::Ttr,
            4 => ROp::Qtr,
            5 => ROp::Rdm,
            6 => ROp::Etr,
            _ => ROp::Xtr,
        }
    }

    /// True when this op puts the unit constant on the R bus.
    pub const fn is_unit_source(&self) -> bool {
        matches!(self, ROp::Utr | ROp::Acu)
    }
}

impl BusOp for ROp {
    fn info(&self) -> OpInfo {
        match self {
            ROp::None => info("", true),
            ROp::Ptr => info("PTR", false),
            ROp::Utr => info("UTR", false),
            ROp::Ttr => info("TTR", false),
            ROp::Qtr => info("QTR", false),
            ROp::Rdm => info("RDM", false),
            ROp::Etr => info("ETR", false),
            ROp::Xtr => info("XTR", false),
            ROp::Acu => info("ACU", false),
            ROp::Ios => info("IOS", false),
            ROp::Ett => info("ETT", false),
        }
    }
}

/// Operations which drive the S (destination) bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum SOp {
    None,
    /// The active accumulator drives S and rotates.
    Ats,
    /// T drives S and rotates.
    Tts,
    /// Toggles the A/B accumulator select flip-flop.
    Sab,
}

impl SOp {
    pub const fn from_code(code: u8) -> SOp {
        match code & 3 {
            0 => SOp::None,
            1 => SOp::Ats,
            2 => SOp::Tts,
            _ => SOp::Sab,
        }
    }
}

impl BusOp for SOp {
    fn info(&self) -> OpInfo {
        match self {
            SOp::None => info("", true),
            SOp::Ats => info("ATS", false),
            SOp::Tts => info("TTS", false),
            SOp::Sab => info("SAB", true),
        }
    }
}

/// Operations which take the ALU output (the T bus) somewhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum XOp {
    None,
    /// The active accumulator loads from the T bus.
    Tta,
    Ttp,
    Ttq,
    Tte,
    /// Q bit 6 takes the ALU output of the terminating pass.
    Tq6,
    /// Memory at M is written from T, in parallel, before the loop.
    Wtm,
    /// The display-blanking tap loads from the T bus.
    Ttb,
}

impl XOp {
    /// Maps the (already rotated) 3-bit X code.
    pub const fn from_code(code: u8) -> XOp {
        match code & 7 {
            0 => XOp::None,
            1 => XOp::Tta,
            2 => XOp::Ttp,
            3 => XOp::Ttq,
            4 => XOp::Tte,
            5 => XOp::Tq6,
            6 => XOp::Wtm,
            _ => XOp::Ttb,
        }
    }
}

impl BusOp for XOp {
    fn info(&self) -> OpInfo {
        match self {
            XOp::None => info("", true),
            XOp::Tta => info("TTA", false),
            XOp::Ttp => info("TTP", false),
            XOp::Ttq => info("TTQ", false),
            XOp::Tte => info("TTE", false),
            XOp::Tq6 => info("TQ6", false),
            XOp::Wtm => info("WTM", true),
            XOp::Ttb => info("TTB", false),
        }
    }
}

/// The transfer-enable field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum AOp {
    None,
    /// Pre-loads the S bus from the active accumulator.
    Te,
}

impl BusOp for AOp {
    fn info(&self) -> OpInfo {
        match self {
            AOp::None => info("", true),
            // Transfer-enable is excluded from shift-skip by its own
            // rule, independent of this flag.
            AOp::Te => info("TE", false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_code_maps() {
        let r: Vec<&str> = (0..8).map(|c| ROp::from_code(c).name()).collect();
        assert_eq!(r, ["", "PTR", "UTR", "TTR", "QTR", "RDM", "ETR", "XTR"]);
        let s: Vec<&str> = (0..4).map(|c| SOp::from_code(c).name()).collect();
        assert_eq!(s, ["", "ATS", "TTS", "SAB"]);
        let x: Vec<&str> = (0..8).map(|c| XOp::from_code(c).name()).collect();
        assert_eq!(x, ["", "TTA", "TTP", "TTQ", "TTE", "TQ6", "WTM", "TTB"]);
    }

    #[test]
    fn test_codes_are_masked() {
        assert_eq!(ROp::from_code(9), ROp::Ptr);
        assert_eq!(SOp::from_code(7), SOp::Sab);
        assert_eq!(XOp::from_code(0xF8), XOp::None);
    }

    #[test]
    fn test_skip_eligibility() {
        let r_ok: Vec<u8> = (0..8).filter(|c| ROp::from_code(*c).skip_ok()).collect();
        assert_eq!(r_ok, [0]);
        let s_ok: Vec<u8> = (0..4).filter(|c| SOp::from_code(*c).skip_ok()).collect();
        assert_eq!(s_ok, [0, 3]);
        let x_ok: Vec<u8> = (0..8).filter(|c| XOp::from_code(*c).skip_ok()).collect();
        assert_eq!(x_ok, [0, 6]);
        assert!(AOp::None.skip_ok());
        assert!(!AOp::Te.skip_ok());
        for derived in [ROp::Acu, ROp::Ios, ROp::Ett] {
            assert!(!derived.skip_ok());
        }
    }

    #[test]
    fn test_unit_source() {
        assert!(ROp::Utr.is_unit_source());
        assert!(ROp::Acu.is_unit_source());
        assert!(!ROp::Ptr.is_unit_source());
    }

    #[test]
    fn test_nop_has_no_name() {
        assert!(ROp::None.is_nop());
        assert!(!XOp::Tq6.is_nop());
    }
}
