//! The arithmetic unit.
//!
//! The adder on the CPU board is not an adder at all; it is a 256-word
//! ROM indexed by the bits on the R and S buses, the carry flip-flop
//! and the opcode.  A second ROM corrects a 4-bit binary sum into a
//! decimal digit.  Both ROMs are wired to their address and output
//! lines in a scrambled order, so building the tables from the raw
//! dumps means undoing the wiring.
//!
//! The tables are checked against integer arithmetic when they are
//! built.  A bad dump is refused rather than producing an ALU which
//! gets some sums wrong.
//!
//! The wiring permutations below are this emulator's own convention.
//! They are not a transcription of the board, so a dump read from a
//! real machine fails the self-check.  `reference_alu_dump` and
//! `reference_bcd_dump` produce dumps in the expected layout.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

/// Width of the ALU ROM output.
pub const ALU_ROM_WIDTH: u32 = 3;
/// Width of the BCD correction ROM output.
pub const BCD_ROM_WIDTH: u32 = 5;

/// Logical ALU index bit `i` is wired to ROM address line
/// `ALU_ADDRESS_WIRING[i]`.
///
/// Logical index layout: bit 0 R, bit 1 S, bit 2 carry, bits 3-5
/// opcode, bit 6 decimal mode, bit 7 unit injection.
const ALU_ADDRESS_WIRING: [u32; 8] = [3, 0, 6, 1, 7, 2, 5, 4];
/// Logical ALU output bit `j` (sum, carry, carry enable) is read from
/// ROM data line `ALU_OUTPUT_WIRING[j]`.
const ALU_OUTPUT_WIRING: [u32; 3] = [2, 0, 1];

/// Logical BCD index layout: bits 0-3 binary nibble, bit 4 binary
/// carry, bit 5 subtract, bits 6-7 not connected.
const BCD_ADDRESS_WIRING: [u32; 8] = [4, 2, 0, 6, 1, 3, 7, 5];
/// Logical BCD output bits 0-3 (digit) and 4 (decimal carry).
const BCD_OUTPUT_WIRING: [u32; 5] = [1, 2, 3, 4, 0];

const SUM: u8 = 1;
const CARRY: u8 = 2;
const CARRY_ENABLE: u8 = 4;

/// The ALU opcode, assembled from the three opcode bits of a
/// micro-instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum AluOp {
    /// R + S + carry.
    Add,
    /// S - R, computed as S + !R + carry.
    Sub,
    /// Decimal add.
    Dad,
    /// Decimal subtract.
    Dsb,
    Ior,
    And,
    Xor,
    Nor,
}

impl AluOp {
    pub const ALL: [AluOp; 8] = [
        AluOp::Add,
        AluOp::Sub,
        AluOp::Dad,
        AluOp::Dsb,
        AluOp::Ior,
        AluOp::And,
        AluOp::Xor,
        AluOp::Nor,
    ];

    pub const fn from_code(code: u8) -> AluOp {
        AluOp::ALL[(code & 7) as usize]
    }

    pub const fn code(&self) -> u8 {
        *self as u8
    }

    pub const fn is_decimal(&self) -> bool {
        matches!(self, AluOp::Dad | AluOp::Dsb)
    }

    pub const fn is_subtract(&self) -> bool {
        matches!(self, AluOp::Sub | AluOp::Dsb)
    }

    /// True if the opcode chains a carry from pulse to pulse.
    pub const fn carries(&self) -> bool {
        matches!(self, AluOp::Add | AluOp::Sub | AluOp::Dad | AluOp::Dsb)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            AluOp::Add => "ADD",
            AluOp::Sub => "SUB",
            AluOp::Dad => "DAD",
            AluOp::Dsb => "DSB",
            AluOp::Ior => "IOR",
            AluOp::And => "AND",
            AluOp::Xor => "XOR",
            AluOp::Nor => "NOR",
        }
    }
}

impl Display for AluOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AluTableError {
    /// A decimal digit pair came out wrong.
    Decimal {
        op: AluOp,
        a: u8,
        b: u8,
        carry: bool,
        expected: (u8, bool),
        found: (u8, bool),
    },
    /// A 4-bit binary operation came out wrong.
    Binary {
        op: AluOp,
        a: u8,
        b: u8,
        carry: bool,
        expected: (u8, bool),
        found: (u8, bool),
    },
}

impl Display for AluTableError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let (kind, op, a, b, carry, expected, found) = match self {
            AluTableError::Decimal {
                op,
                a,
                b,
                carry,
                expected,
                found,
            } => ("decimal", op, a, b, carry, expected, found),
            AluTableError::Binary {
                op,
                a,
                b,
                carry,
                expected,
                found,
            } => ("binary", op, a, b, carry, expected, found),
        };
        write!(
            f,
            "ALU self-check failed ({kind}): {op} a={a} b={b} carry={} gave digit {} carry {} but should give digit {} carry {}",
            u8::from(*carry),
            found.0,
            u8::from(found.1),
            expected.0,
            u8::from(expected.1),
        )
    }
}

impl Error for AluTableError {}

fn bit(value: u32, n: u32) -> u32 {
    (value >> n) & 1
}

/// Moves logical bit `i` of `value` to position `wiring[i]`.
fn scatter(value: u32, wiring: &[u32]) -> u32 {
    wiring
        .iter()
        .enumerate()
        .fold(0, |acc, (i, line)| acc | (bit(value, i as u32) << line))
}

/// Collects logical bit `j` from position `wiring[j]` of `raw`.
fn gather(raw: u32, wiring: &[u32]) -> u32 {
    wiring
        .iter()
        .enumerate()
        .fold(0, |acc, (j, line)| acc | (bit(raw, *line) << j))
}

fn alu_index(op: AluOp, r: bool, s: bool, carry: bool, decimal: bool, unit: bool) -> usize {
    usize::from(r)
        | usize::from(s) << 1
        | usize::from(carry) << 2
        | usize::from(op.code()) << 3
        | usize::from(decimal) << 6
        | usize::from(unit) << 7
}

fn bcd_index(nibble: u8, carry: bool, subtract: bool) -> usize {
    usize::from(nibble & 0xF) | usize::from(carry) << 4 | usize::from(subtract) << 5
}

/// What the ALU ROM should contain at logical index `index`.
fn alu_truth(index: usize) -> u8 {
    let r = (index & 1) as u8 | ((index >> 7) & 1) as u8;
    let s = ((index >> 1) & 1) as u8;
    let c = ((index >> 2) & 1) as u8;
    let op = AluOp::from_code((index >> 3) as u8);
    let (sum, carry) = match op {
        AluOp::Add | AluOp::Dad => {
            let t = r + s + c;
            (t & 1, t >> 1)
        }
        AluOp::Sub | AluOp::Dsb => {
            let t = s + (1 - r) + c;
            (t & 1, t >> 1)
        }
        AluOp::Ior => (r | s, c),
        AluOp::And => (r & s, c),
        AluOp::Xor => (r ^ s, c),
        AluOp::Nor => (1 - (r | s), c),
    };
    let enable = if op.carries() { CARRY_ENABLE } else { 0 };
    sum | (carry << 1) | enable
}

/// What the BCD ROM should contain at logical index `index`.
fn bcd_truth(index: usize) -> u8 {
    let nibble = (index & 0xF) as i32;
    let carry = ((index >> 4) & 1) as i32;
    let subtract = (index >> 5) & 1 != 0;
    let v = carry * 16 + nibble - if subtract { 6 } else { 0 };
    let digit = v.rem_euclid(10) as u8;
    digit | (u8::from(v >= 10) << 4)
}

fn burn(truth: fn(usize) -> u8, address: &[u32], output: &[u32], width: u32) -> RomDump {
    let mut words = vec![0u32; ROM_WORDS];
    for index in 0..ROM_WORDS {
        let line = scatter(index as u32, address) as usize;
        words[line] = scatter(u32::from(truth(index)), output);
    }
    RomDump::from_words(width, words)
}

/// The ALU ROM contents, generated from arithmetic rather than read
/// from a dump.
pub fn reference_alu_dump() -> RomDump {
    burn(alu_truth, &ALU_ADDRESS_WIRING, &ALU_OUTPUT_WIRING, ALU_ROM_WIDTH)
}

/// The BCD ROM contents, generated from arithmetic.
pub fn reference_bcd_dump() -> RomDump {
    burn(bcd_truth, &BCD_ADDRESS_WIRING, &BCD_OUTPUT_WIRING, BCD_ROM_WIDTH)
}

/// The two lookup tables in logical (unscrambled) order.
#[derive(Clone, PartialEq, Eq)]
pub struct AluTables {
    alu: [u8; ROM_WORDS],
    bcd: [u8; ROM_WORDS],
}

impl AluTables {
    /// Builds and self-checks the tables.
    pub fn from_dumps(alu: &RomDump, bcd: &RomDump) -> Result<AluTables, AluTableError> {
        let tables = AluTables::unchecked(alu, bcd);
        tables.self_check()?;
        event!(Level::DEBUG, "ALU and BCD tables passed self-check");
        Ok(tables)
    }

    fn unchecked(alu: &RomDump, bcd: &RomDump) -> AluTables {
        let mut tables = AluTables {
            alu: [0; ROM_WORDS],
            bcd: [0; ROM_WORDS],
        };
        for index in 0..ROM_WORDS {
            let a = scatter(index as u32, &ALU_ADDRESS_WIRING) as usize;
            tables.alu[index] = gather(alu.word(a), &ALU_OUTPUT_WIRING) as u8;
            let b = scatter(index as u32, &BCD_ADDRESS_WIRING) as usize;
            tables.bcd[index] = gather(bcd.word(b), &BCD_OUTPUT_WIRING) as u8;
        }
        tables
    }

    /// Tables built from [`reference_alu_dump`] and
    /// [`reference_bcd_dump`].
    pub fn reference() -> AluTables {
        AluTables::unchecked(&reference_alu_dump(), &reference_bcd_dump())
    }

    fn correct(&self, nibble: u8, carry: bool, subtract: bool) -> (u8, bool) {
        let e = self.bcd[bcd_index(nibble, carry, subtract)];
        (e & 0xF, e & 0x10 != 0)
    }

    /// Runs every decimal digit pair, both carry-in values and both
    /// directions through the serial ALU, plus every 4-bit binary
    /// operand pair for every opcode.
    pub fn self_check(&self) -> Result<(), AluTableError> {
        let mut alu = Alu::new(self.clone());
        let run = |alu: &mut Alu, op: AluOp, a: u8, b: u8, carry: bool| {
            alu.init(carry, false, op.is_decimal());
            for n in 0..4 {
                alu.exec(op, (b >> n) & 1 != 0, (a >> n) & 1 != 0);
                alu.clock();
            }
        };
        for op in [AluOp::Dad, AluOp::Dsb] {
            for a in 0..10u8 {
                for b in 0..10u8 {
                    for carry in [false, true] {
                        run(&mut alu, op, a, b, carry);
                        let found = alu.decimal_result();
                        let t = if op.is_subtract() {
                            a + 9 - b + u8::from(carry)
                        } else {
                            a + b + u8::from(carry)
                        };
                        let expected = (t % 10, t >= 10);
                        if found != expected {
                            return Err(AluTableError::Decimal {
                                op,
                                a,
                                b,
                                carry,
                                expected,
                                found,
                            });
                        }
                    }
                }
            }
        }
        for op in AluOp::ALL.into_iter().filter(|op| !op.is_decimal()) {
            for a in 0..16u8 {
                for b in 0..16u8 {
                    for carry in [false, true] {
                        run(&mut alu, op, a, b, carry);
                        let found = (alu.nibble(), alu.carry());
                        let c = u8::from(carry);
                        let expected = match op {
                            AluOp::Add => {
                                let t = a + b + c;
                                (t & 0xF, t > 0xF)
                            }
                            AluOp::Sub => {
                                let t = a + (!b & 0xF) + c;
                                (t & 0xF, t > 0xF)
                            }
                            AluOp::Ior => (a | b, carry),
                            AluOp::And => (a & b, carry),
                            AluOp::Xor => (a ^ b, carry),
                            AluOp::Nor => (!(a | b) & 0xF, carry),
                            AluOp::Dad | AluOp::Dsb => unreachable!("filtered out above"),
                        };
                        if found != expected {
                            return Err(AluTableError::Binary {
                                op,
                                a,
                                b,
                                carry,
                                expected,
                                found,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for AluTables {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("AluTables{..}")
    }
}

/// The result of one ALU pulse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AluOutput {
    /// The bit placed on the T bus.
    pub bit: bool,
    /// The low nibble including this pulse's bit, decimal-corrected
    /// in decimal mode.
    pub nibble: u8,
}

/// The bit-serial ALU.  Apart from the tables it holds only the carry
/// flip-flop, the mode latched by [`Alu::init`] and a 4-bit record of
/// the last sum bits.
#[derive(Debug, Clone)]
pub struct Alu {
    tables: AluTables,
    op: AluOp,
    carry: bool,
    tentative_carry: bool,
    unit: bool,
    decimal: bool,
    sum: bool,
    nibble: u8,
}

impl Alu {
    pub fn new(tables: AluTables) -> Alu {
        Alu {
            tables,
            op: AluOp::Add,
            carry: false,
            tentative_carry: false,
            unit: false,
            decimal: false,
            sum: false,
            nibble: 0,
        }
    }

    pub fn init(&mut self, carry: bool, unit: bool, decimal: bool) {
        self.carry = carry;
        self.tentative_carry = carry;
        self.unit = unit;
        self.decimal = decimal;
        self.sum = false;
        self.nibble = 0;
    }

    /// Evaluates one pulse.  Nothing is committed until
    /// [`Alu::clock`].
    pub fn exec(&mut self, op: AluOp, r: bool, s: bool) -> AluOutput {
        self.op = op;
        let e = self.tables.alu[alu_index(op, r, s, self.carry, self.decimal, self.unit)];
        self.sum = e & SUM != 0;
        self.tentative_carry = if e & CARRY_ENABLE != 0 {
            e & CARRY != 0
        } else {
            self.carry
        };
        let binary = (self.nibble >> 1) | (u8::from(self.sum) << 3);
        let nibble = if self.decimal {
            self.tables
                .correct(binary, self.tentative_carry, op.is_subtract())
                .0
        } else {
            binary
        };
        AluOutput {
            bit: self.sum,
            nibble,
        }
    }

    /// Commits the pulse evaluated by the last [`Alu::exec`].  The
    /// unit constant is only injected on the first pulse.
    pub fn clock(&mut self) {
        self.carry = self.tentative_carry;
        self.nibble = (self.nibble >> 1) | (u8::from(self.sum) << 3);
        self.unit = false;
    }

    /// The committed carry.
    pub fn carry(&self) -> bool {
        self.carry
    }

    /// The carry produced by the last [`Alu::exec`], committed or not.
    pub fn tentative_carry(&self) -> bool {
        self.tentative_carry
    }

    /// The last four committed sum bits, most recent in bit 3.
    pub fn nibble(&self) -> u8 {
        self.nibble
    }

    /// The committed nibble and carry, corrected to a decimal digit
    /// and decimal carry.
    pub fn decimal_result(&self) -> (u8, bool) {
        self.tables
            .correct(self.nibble, self.carry, self.op.is_subtract())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_strategy::proptest;

    fn alu() -> Alu {
        Alu::new(AluTables::reference())
    }

    #[test]
    fn test_wiring_tables_are_permutations() {
        for wiring in [&ALU_ADDRESS_WIRING, &BCD_ADDRESS_WIRING] {
            let mut seen: Vec<u32> = wiring.to_vec();
            seen.sort();
            assert_eq!(seen, (0..8).collect::<Vec<u32>>());
        }
    }

    #[test]
    fn test_reference_tables_pass_self_check() {
        let tables = AluTables::from_dumps(&reference_alu_dump(), &reference_bcd_dump())
            .expect("reference tables should be correct");
        assert_eq!(tables, AluTables::reference());
    }

    #[test]
    fn test_reference_dump_is_scrambled() {
        // If the wiring were the identity the logical and physical
        // orders would agree; make sure the scrambling is really
        // being exercised.
        let logical: Vec<u32> = (0..ROM_WORDS).map(|i| u32::from(alu_truth(i))).collect();
        assert_ne!(reference_alu_dump().words(), &logical[..]);
    }

    #[test]
    fn test_dump_in_other_wiring_is_refused() {
        let straight: [u32; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
        let alu = burn(alu_truth, &straight, &[0, 1, 2], ALU_ROM_WIDTH);
        let bcd = burn(bcd_truth, &straight, &[0, 1, 2, 3, 4], BCD_ROM_WIDTH);
        assert!(AluTables::from_dumps(&alu, &reference_bcd_dump()).is_err());
        assert!(AluTables::from_dumps(&reference_alu_dump(), &bcd).is_err());
    }

    #[test]
    fn test_reference_dump_survives_text_form() {
        let dump = reference_bcd_dump();
        let text = format_dump(dump.words(), BCD_ROM_WIDTH);
        assert_eq!(parse_dump(&text, BCD_ROM_WIDTH), Ok(dump));
    }

    #[test]
    fn test_corrupt_dump_fails_loudly() {
        let good = reference_bcd_dump();
        let mut words = good.words().to_vec();
        // 9 + 9 + 1 leaves binary nibble 3 with carry, logical
        // index 0x13, which should read as digit 9 with decimal
        // carry.  Flip the low digit bit of that entry.
        let line = scatter(0x13, &BCD_ADDRESS_WIRING) as usize;
        words[line] ^= scatter(1, &BCD_OUTPUT_WIRING);
        let bad = RomDump::from_words(BCD_ROM_WIDTH, words);
        match AluTables::from_dumps(&reference_alu_dump(), &bad) {
            Err(AluTableError::Decimal { .. }) => (),
            other => panic!("expected a decimal self-check failure, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_alu_dump_fails_loudly() {
        let mut words = reference_alu_dump().words().to_vec();
        for w in words.iter_mut() {
            *w = 0;
        }
        let bad = RomDump::from_words(ALU_ROM_WIDTH, words);
        assert!(AluTables::from_dumps(&bad, &reference_bcd_dump()).is_err());
    }

    #[test]
    fn test_unit_constant_on_first_pulse_only() {
        let mut alu = alu();
        alu.init(false, true, false);
        let first = alu.exec(AluOp::Add, false, false);
        assert!(first.bit);
        alu.clock();
        let second = alu.exec(AluOp::Add, false, false);
        assert!(!second.bit);
    }

    #[test]
    fn test_logic_ops_leave_carry_alone() {
        let mut alu = alu();
        alu.init(true, false, false);
        for op in [AluOp::Ior, AluOp::And, AluOp::Xor, AluOp::Nor] {
            alu.exec(op, true, true);
            alu.clock();
            assert!(alu.carry(), "{op} changed the carry");
        }
    }

    #[test]
    fn test_exhaustive_decimal_digits() {
        let mut alu = alu();
        for subtract in [false, true] {
            let op = if subtract { AluOp::Dsb } else { AluOp::Dad };
            for a in 0..10u8 {
                for b in 0..10u8 {
                    for carry in [false, true] {
                        alu.init(carry, false, true);
                        let mut last = AluOutput {
                            bit: false,
                            nibble: 0,
                        };
                        for n in 0..4 {
                            last = alu.exec(op, (b >> n) & 1 != 0, (a >> n) & 1 != 0);
                            alu.clock();
                        }
                        let c = u8::from(carry);
                        let t = if subtract { a + 9 - b + c } else { a + b + c };
                        assert_eq!(alu.decimal_result(), (t % 10, t >= 10));
                        assert_eq!(last.nibble, t % 10);
                    }
                }
            }
        }
    }

    #[test]
    fn test_self_check_error_message() {
        let e = AluTableError::Decimal {
            op: AluOp::Dad,
            a: 9,
            b: 9,
            carry: true,
            expected: (9, true),
            found: (3, false),
        };
        assert_eq!(
            e.to_string(),
            "ALU self-check failed (decimal): DAD a=9 b=9 carry=1 gave digit 3 carry 0 but should give digit 9 carry 1"
        );
    }

    #[proptest]
    fn sixteen_bit_serial_add_matches_integer_add(a: u16, b: u16, carry: bool) {
        let mut alu = alu();
        alu.init(carry, false, false);
        let mut sum = 0u16;
        for n in 0..16 {
            let out = alu.exec(AluOp::Add, (b >> n) & 1 != 0, (a >> n) & 1 != 0);
            alu.clock();
            sum |= u16::from(out.bit) << n;
        }
        let wide = u32::from(a) + u32::from(b) + u32::from(carry);
        assert_eq!(sum, wide as u16);
        assert_eq!(alu.carry(), wide > 0xFFFF);
    }

    #[proptest]
    fn sixteen_bit_serial_sub_matches_integer_sub(a: u16, b: u16) {
        let mut alu = alu();
        // Carry in set makes S + !R + 1 a two's complement subtract.
        alu.init(true, false, false);
        let mut diff = 0u16;
        for n in 0..16 {
            let out = alu.exec(AluOp::Sub, (b >> n) & 1 != 0, (a >> n) & 1 != 0);
            alu.clock();
            diff |= u16::from(out.bit) << n;
        }
        assert_eq!(diff, a.wrapping_sub(b));
        // Carry out means "no borrow".
        assert_eq!(alu.carry(), a >= b);
    }
}
