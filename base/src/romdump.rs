//! Reading ROM dumps.
//!
//! A dump is a text file with one word per line, written as a string
//! of binary digits, most significant bit first.  The control store
//! and both ALU tables are 256 words deep.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Depth of every ROM on the CPU board.
pub const ROM_WORDS: usize = 256;

#[derive(Debug, PartialEq, Eq)]
pub enum RomDumpError {
    /// Fewer lines than the ROM has words.
    Short { expected: usize, found: usize },
    /// More lines than the ROM has words.
    Long { expected: usize },
    /// A line (numbered from 1) contains nothing.
    EmptyLine { line: usize },
    /// A line contains a character other than `0` or `1`.
    BadDigit { line: usize, ch: char },
    /// A line has more digits than the ROM has output lines.
    TooWide { line: usize, digits: usize, width: u32 },
}

impl Display for RomDumpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RomDumpError::Short { expected, found } => {
                write!(f, "ROM dump is too short: expected {expected} words but found only {found}")
            }
            RomDumpError::Long { expected } => {
                write!(f, "ROM dump is too long: expected exactly {expected} words")
            }
            RomDumpError::EmptyLine { line } => write!(f, "line {line} of ROM dump is empty"),
            RomDumpError::BadDigit { line, ch } => {
                write!(f, "line {line} of ROM dump contains {ch:?}, which is not a binary digit")
            }
            RomDumpError::TooWide {
                line,
                digits,
                width,
            } => write!(
                f,
                "line {line} of ROM dump has {digits} digits but the ROM is only {width} bits wide"
            ),
        }
    }
}

impl Error for RomDumpError {}

/// The contents of one ROM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RomDump {
    width: u32,
    words: Vec<u32>,
}

impl RomDump {
    pub fn from_words(width: u32, words: Vec<u32>) -> RomDump {
        let mask = word_mask(width);
        RomDump {
            width,
            words: words.into_iter().map(|w| w & mask).collect(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Reads the word at `index`.  Only the low eight bits of the
    /// index reach the ROM's address lines.
    pub fn word(&self, index: usize) -> u32 {
        match self.words.len() {
            0 => 0,
            n => self.words[index % n],
        }
    }
}

fn word_mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}

fn parse_line(line_number: usize, line: &str, width: u32) -> Result<u32, RomDumpError> {
    let digits = line.trim();
    if digits.is_empty() {
        return Err(RomDumpError::EmptyLine { line: line_number });
    }
    if let Some(ch) = digits.chars().find(|ch| *ch != '0' && *ch != '1') {
        return Err(RomDumpError::BadDigit {
            line: line_number,
            ch,
        });
    }
    // Leading zeroes don't count against the width.
    let significant = digits.trim_start_matches('0').len();
    if significant > width as usize {
        return Err(RomDumpError::TooWide {
            line: line_number,
            digits: digits.len(),
            width,
        });
    }
    Ok(digits
        .bytes()
        .fold(0u32, |acc, b| (acc << 1) | u32::from(b == b'1')))
}

/// Parses any number of words.  Trailing blank lines are ignored;
/// blank lines elsewhere are errors.
pub fn parse_words(text: &str, width: u32) -> Result<Vec<u32>, RomDumpError> {
    let body = text.trim_end();
    if body.is_empty() {
        return Ok(Vec::new());
    }
    body.lines()
        .enumerate()
        .map(|(i, line)| parse_line(i + 1, line, width))
        .collect()
}

/// Parses a dump which must contain exactly [`ROM_WORDS`] words.
pub fn parse_dump(text: &str, width: u32) -> Result<RomDump, RomDumpError> {
    let words = parse_words(text, width)?;
    match words.len() {
        n if n < ROM_WORDS => Err(RomDumpError::Short {
            expected: ROM_WORDS,
            found: n,
        }),
        n if n > ROM_WORDS => Err(RomDumpError::Long {
            expected: ROM_WORDS,
        }),
        _ => Ok(RomDump::from_words(width, words)),
    }
}

/// Writes words in the format [`parse_words`] reads.
pub fn format_dump(words: &[u32], width: u32) -> String {
    let mut out = String::with_capacity(words.len() * (width as usize + 1));
    for w in words {
        for bit in (0..width).rev() {
            out.push(if (w >> bit) & 1 != 0 { '1' } else { '0' });
        }
        out.push('\n');
    }
    out
}
