//! This module emulates the calculator's read/write memory and its
//! program ROMs.
//!
//! Both live in one flat 15-bit address space of 16-bit words.  The
//! engine never asks which kind of memory a cell is; a ROM cell just
//! ignores writes.  Each cell also carries the breakpoint and watch
//! flags used by debugging front ends.
use std::fmt::{self, Debug, Display, Formatter};

use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CellKind {
    Rom,
    Ram,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MemoryCell {
    value: u16,
    kind: CellKind,
    breakpoint: bool,
    watch: bool,
}

/// What became of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    /// Stored, and the cell is being watched.
    Watched,
    /// The cell is ROM; nothing changed.
    ReadOnly,
}

impl MemoryCell {
    pub const fn ram(value: u16) -> MemoryCell {
        MemoryCell {
            value,
            kind: CellKind::Ram,
            breakpoint: false,
            watch: false,
        }
    }

    pub const fn rom(value: u16) -> MemoryCell {
        MemoryCell {
            value,
            kind: CellKind::Rom,
            breakpoint: false,
            watch: false,
        }
    }

    pub fn read(&self) -> u16 {
        self.value
    }

    pub fn write(&mut self, value: u16) -> WriteOutcome {
        match self.kind {
            CellKind::Rom => WriteOutcome::ReadOnly,
            CellKind::Ram => {
                self.value = value;
                if self.watch {
                    WriteOutcome::Watched
                } else {
                    WriteOutcome::Stored
                }
            }
        }
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn breakpoint(&self) -> bool {
        self.breakpoint
    }

    pub fn watched(&self) -> bool {
        self.watch
    }
}

impl Debug for MemoryCell {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:06o}", self.value)?;
        if self.kind == CellKind::Rom {
            f.write_str("r")?;
        }
        if self.breakpoint {
            f.write_str("b")?;
        }
        if self.watch {
            f.write_str("w")?;
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum LoadFailure {
    /// The image would run past the top of memory.
    TooLarge { base: Address, words: usize },
}

impl Display for LoadFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LoadFailure::TooLarge { base, words } => write!(
                f,
                "{words} words loaded at address {base} would run past the top of memory"
            ),
        }
    }
}

impl std::error::Error for LoadFailure {}

pub struct MemoryUnit {
    cells: Vec<MemoryCell>,
}

impl MemoryUnit {
    /// All 32,768 cells as zeroed RAM.
    pub fn new() -> MemoryUnit {
        MemoryUnit {
            cells: vec![MemoryCell::ram(0); Address::SPAN],
        }
    }

    pub fn cell(&self, addr: Address) -> &MemoryCell {
        &self.cells[addr.index()]
    }

    pub fn read(&self, addr: Address) -> u16 {
        self.cell(addr).read()
    }

    pub fn write(&mut self, addr: Address, value: u16) -> WriteOutcome {
        let outcome = self.cells[addr.index()].write(value);
        match outcome {
            WriteOutcome::Watched => {
                event!(Level::INFO, "watched cell {} written with {:06o}", addr, value);
            }
            WriteOutcome::ReadOnly => {
                event!(Level::TRACE, "write of {:06o} to ROM cell {} ignored", value, addr);
            }
            WriteOutcome::Stored => (),
        }
        outcome
    }

    fn load(&mut self, base: Address, words: &[u16], make: fn(u16) -> MemoryCell) -> Result<(), LoadFailure> {
        if base.index() + words.len() > Address::SPAN {
            return Err(LoadFailure::TooLarge {
                base,
                words: words.len(),
            });
        }
        for (cell, w) in self.cells[base.index()..].iter_mut().zip(words) {
            let keep = *cell;
            *cell = MemoryCell {
                breakpoint: keep.breakpoint,
                watch: keep.watch,
                ..make(*w)
            };
        }
        event!(
            Level::DEBUG,
            "loaded {} words at {}",
            words.len(),
            base
        );
        Ok(())
    }

    /// Loads read-only words starting at `base`.
    pub fn load_rom(&mut self, base: Address, words: &[u16]) -> Result<(), LoadFailure> {
        self.load(base, words, MemoryCell::rom)
    }

    pub fn load_ram(&mut self, base: Address, words: &[u16]) -> Result<(), LoadFailure> {
        self.load(base, words, MemoryCell::ram)
    }

    pub fn set_breakpoint(&mut self, addr: Address, on: bool) {
        self.cells[addr.index()].breakpoint = on;
    }

    pub fn set_watch(&mut self, addr: Address, on: bool) {
        self.cells[addr.index()].watch = on;
    }

    pub fn is_breakpoint(&self, addr: Address) -> bool {
        self.cell(addr).breakpoint
    }
}

impl Default for MemoryUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for MemoryUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let rom = self.cells.iter().filter(|c| c.kind == CellKind::Rom).count();
        let breakpoints = self.cells.iter().filter(|c| c.breakpoint).count();
        f.debug_struct("MemoryUnit")
            .field("rom_cells", &rom)
            .field("breakpoints", &breakpoints)
            .finish()
    }
}
