use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::PathBuf;

use base::prelude::*;

use crate::alu::AluTableError;
use crate::memory::LoadFailure;

/// Something is wrong with the ROM images.  None of these can be
/// recovered from; the machine cannot run without all three tables.
#[derive(Debug)]
pub enum LoadError {
    Io { path: PathBuf, error: io::Error },
    Dump { path: PathBuf, error: RomDumpError },
    Alu(AluTableError),
    Memory { path: PathBuf, error: LoadFailure },
}

impl Display for LoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io { path, error } => {
                write!(f, "failed to read {}: {}", path.display(), error)
            }
            LoadError::Dump { path, error } => write!(f, "{}: {}", path.display(), error),
            LoadError::Alu(e) => write!(f, "ALU tables failed their self-check: {e}"),
            LoadError::Memory { path, error } => write!(f, "{}: {}", path.display(), error),
        }
    }
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LoadError::Io { error, .. } => Some(error),
            LoadError::Dump { error, .. } => Some(error),
            LoadError::Alu(e) => Some(e),
            LoadError::Memory { error, .. } => Some(error),
        }
    }
}

impl From<AluTableError> for LoadError {
    fn from(e: AluTableError) -> LoadError {
        LoadError::Alu(e)
    }
}

/// A bad machine or device configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownDevice(String),
    BadSelectCode(String),
    BadDeviceSpec(String),
    BadModel(String),
    BadTimingMode(String),
    BadRomSpec(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownDevice(tag) => write!(f, "unknown device type '{tag}'"),
            ConfigError::BadSelectCode(s) => {
                write!(f, "'{s}' is not a select code (expected 1 to 15)")
            }
            ConfigError::BadDeviceSpec(s) => {
                write!(f, "'{s}' is not a device specification (expected TYPE@SELECTCODE)")
            }
            ConfigError::BadModel(s) => {
                write!(f, "unknown model '{s}' (expected 9810, 9820 or 9830)")
            }
            ConfigError::BadTimingMode(s) => {
                write!(f, "unknown timing mode '{s}' (expected virtual or calibrated)")
            }
            ConfigError::BadRomSpec(s) => {
                write!(f, "'{s}' is not a ROM specification (expected FILE@OCTALADDRESS)")
            }
        }
    }
}

impl Error for ConfigError {}
