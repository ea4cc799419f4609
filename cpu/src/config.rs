use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::io::Model;
use crate::timing::TimingMode;

/// How much the engine reports to a trace sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TraceLevel {
    #[default]
    Off,
    /// One line per micro-instruction.
    Micro,
    /// One line per machine instruction, at the fetch boundary.
    Instruction,
}

impl Display for TraceLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TraceLevel::Off => "off",
            TraceLevel::Micro => "micro",
            TraceLevel::Instruction => "instruction",
        })
    }
}

impl FromStr for TraceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<TraceLevel, String> {
        match s {
            "off" => Ok(TraceLevel::Off),
            "micro" => Ok(TraceLevel::Micro),
            "instruction" => Ok(TraceLevel::Instruction),
            _ => Err(format!(
                "unknown trace level '{s}' (expected off, micro or instruction)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineConfig {
    pub model: Model,
    pub timing: TimingMode,
    /// Skip the bit-serial loop for instructions whose loop cannot
    /// change anything.  Turning this off changes only the speed.
    pub shift_skip: bool,
    /// How long one I/O handshake may take before the microcode is
    /// told to hold and retry.
    pub handshake_timeout: Duration,
    pub trace: TraceLevel,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            model: Model::default(),
            timing: TimingMode::default(),
            shift_skip: true,
            handshake_timeout: Duration::from_millis(5),
            trace: TraceLevel::Off,
        }
    }
}

#[test]
fn test_trace_level_parse() {
    assert_eq!("micro".parse::<TraceLevel>(), Ok(TraceLevel::Micro));
    assert!("verbose".parse::<TraceLevel>().is_err());
    assert_eq!(TraceLevel::Instruction.to_string(), "instruction");
}
