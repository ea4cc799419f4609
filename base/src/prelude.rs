//! The prelude exports the types which almost every user of the
//! `base` crate needs.
pub use super::bitreg::{ShiftKind, ShiftRegister};
pub use super::romdump::{format_dump, parse_dump, parse_words, RomDump, RomDumpError, ROM_WORDS};
pub use super::types::*;
