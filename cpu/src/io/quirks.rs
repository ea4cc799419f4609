//! Per-model wiring of the I/O backplane.
//!
//! The three calculators share the CPU board but not the I/O board.
//! The select codes of the built-in peripherals differ, and on the
//! keyboard select code some control micro-instructions are wired to
//! front-panel hardware instead of running a handshake.
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::Serialize;

use base::prelude::*;

use super::IoOp;
use crate::error::ConfigError;
use crate::event::OutputEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Model {
    #[default]
    Hp9810,
    Hp9820,
    Hp9830,
}

impl Model {
    pub const ALL: [Model; 3] = [Model::Hp9810, Model::Hp9820, Model::Hp9830];

    pub fn profile(&self) -> &'static ModelProfile {
        match self {
            Model::Hp9810 => &HP9810,
            Model::Hp9820 => &HP9820,
            Model::Hp9830 => &HP9830,
        }
    }
}

impl Display for Model {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Model::Hp9810 => "9810",
            Model::Hp9820 => "9820",
            Model::Hp9830 => "9830",
        })
    }
}

impl FromStr for Model {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Model, ConfigError> {
        let digits = s
            .strip_prefix("hp")
            .or_else(|| s.strip_prefix("HP"))
            .unwrap_or(s);
        match digits {
            "9810" => Ok(Model::Hp9810),
            "9820" => Ok(Model::Hp9820),
            "9830" => Ok(Model::Hp9830),
            _ => Err(ConfigError::BadModel(s.to_string())),
        }
    }
}

/// What happens instead of a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuirkAction {
    Beep,
    BlankDisplay,
    ReleaseKeyboard,
}

impl QuirkAction {
    pub fn event(&self) -> OutputEvent {
        match self {
            QuirkAction::Beep => OutputEvent::Beep,
            QuirkAction::BlankDisplay => OutputEvent::DisplayBlank,
            QuirkAction::ReleaseKeyboard => OutputEvent::KeyboardReleased,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quirk {
    pub select_code: SelectCode,
    pub op: IoOp,
    pub action: QuirkAction,
}

/// How `OT16` drives the bus depends on what is listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    KeyboardDisplay,
    Printer,
    Plotter,
    General,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ModelProfile {
    pub model: Model,
    pub keyboard: SelectCode,
    pub printer: SelectCode,
    pub plotter: Option<SelectCode>,
    /// When set, acknowledging a service request puts the strobe
    /// vector on the bus so the firmware can see who asked.
    pub identify_requester: bool,
    pub quirks: &'static [Quirk],
}

const KEYBOARD: SelectCode = SelectCode::masked(12);

static HP9810: ModelProfile = ModelProfile {
    model: Model::Hp9810,
    keyboard: KEYBOARD,
    printer: SelectCode::masked(15),
    plotter: None,
    identify_requester: false,
    quirks: &[Quirk {
        select_code: KEYBOARD,
        op: IoOp::Stc,
        action: QuirkAction::Beep,
    }],
};

static HP9820: ModelProfile = ModelProfile {
    model: Model::Hp9820,
    keyboard: KEYBOARD,
    printer: SelectCode::masked(15),
    plotter: Some(SelectCode::masked(13)),
    identify_requester: true,
    quirks: &[Quirk {
        select_code: KEYBOARD,
        op: IoOp::Stc,
        action: QuirkAction::BlankDisplay,
    }],
};

static HP9830: ModelProfile = ModelProfile {
    model: Model::Hp9830,
    keyboard: KEYBOARD,
    printer: SelectCode::masked(15),
    plotter: Some(SelectCode::masked(14)),
    identify_requester: true,
    quirks: &[
        Quirk {
            select_code: KEYBOARD,
            op: IoOp::Stc,
            action: QuirkAction::Beep,
        },
        Quirk {
            select_code: KEYBOARD,
            op: IoOp::Clc,
            action: QuirkAction::ReleaseKeyboard,
        },
    ],
};

impl ModelProfile {
    pub fn class_of(&self, sc: SelectCode) -> DeviceClass {
        if sc == self.keyboard {
            DeviceClass::KeyboardDisplay
        } else if sc == self.printer {
            DeviceClass::Printer
        } else if Some(sc) == self.plotter {
            DeviceClass::Plotter
        } else {
            DeviceClass::General
        }
    }

    pub fn quirk(&self, sc: SelectCode, op: IoOp) -> Option<QuirkAction> {
        self.quirks
            .iter()
            .find(|q| q.select_code == sc && q.op == op)
            .map(|q| q.action)
    }
}
