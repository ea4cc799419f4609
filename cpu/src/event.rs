use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use base::prelude::*;

/// Things the emulated machine does which the host should show or
/// sound.  The engine and the arbiter send these down a channel; the
/// front end drains it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OutputEvent {
    Beep,
    /// The display was blanked by a select-code quirk.
    DisplayBlank,
    KeyboardReleased,
    /// The blanking tap of the display register changed.
    Blanking(bool),
    Printed {
        select_code: SelectCode,
        byte: u8,
    },
    MemoryWatch {
        address: Address,
        value: u16,
    },
}

impl Display for OutputEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OutputEvent::Beep => f.write_str("beep"),
            OutputEvent::DisplayBlank => f.write_str("display blanked"),
            OutputEvent::KeyboardReleased => f.write_str("keyboard released"),
            OutputEvent::Blanking(on) => write!(f, "blanking {}", if *on { "on" } else { "off" }),
            OutputEvent::Printed { select_code, byte } => {
                write!(f, "printer {select_code}: {byte:#04x}")
            }
            OutputEvent::MemoryWatch { address, value } => {
                write!(f, "watched cell {address} := {value:06o}")
            }
        }
    }
}
