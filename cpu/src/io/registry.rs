//! Peripheral types which can be attached by name.
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::mpsc::Sender;

use base::prelude::*;

use super::dev_loopback::Loopback;
use super::dev_printer::Printer;
use super::{Device, Model};
use crate::error::ConfigError;
use crate::event::OutputEvent;

/// What a constructor gets to know about where its device will live.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub select_code: SelectCode,
    pub model: Model,
    pub events: Sender<OutputEvent>,
}

pub type Constructor = fn(&DeviceContext) -> Box<dyn Device>;

fn make_printer(ctx: &DeviceContext) -> Box<dyn Device> {
    Box::new(Printer::new(ctx.select_code, ctx.events.clone()))
}

fn make_loopback(_ctx: &DeviceContext) -> Box<dyn Device> {
    Box::new(Loopback::new())
}

/// Maps a device type tag to a constructor.
#[derive(Clone)]
pub struct DeviceRegistry {
    constructors: BTreeMap<&'static str, Constructor>,
}

impl DeviceRegistry {
    pub fn empty() -> DeviceRegistry {
        DeviceRegistry {
            constructors: BTreeMap::new(),
        }
    }

    /// The peripherals this crate knows how to build.
    pub fn builtin() -> DeviceRegistry {
        let mut reg = DeviceRegistry::empty();
        reg.register("printer", make_printer);
        reg.register("loopback", make_loopback);
        reg
    }

    pub fn register(&mut self, tag: &'static str, constructor: Constructor) {
        self.constructors.insert(tag, constructor);
    }

    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }

    pub fn create(&self, tag: &str, ctx: &DeviceContext) -> Result<Box<dyn Device>, ConfigError> {
        match self.constructors.get(tag) {
            Some(constructor) => Ok(constructor(ctx)),
            None => Err(ConfigError::UnknownDevice(tag.to_string())),
        }
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.tags()).finish()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// A device type and where to attach it, written `TAG@SC`, for
/// example `printer@15`.  The select code is decimal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub tag: String,
    pub select_code: SelectCode,
}

impl FromStr for DeviceSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<DeviceSpec, ConfigError> {
        let (tag, sc) = s
            .split_once('@')
            .ok_or_else(|| ConfigError::BadDeviceSpec(s.to_string()))?;
        if tag.is_empty() {
            return Err(ConfigError::BadDeviceSpec(s.to_string()));
        }
        match sc.parse::<u8>() {
            Ok(n) if (1..=SelectCode::MASK).contains(&n) => Ok(DeviceSpec {
                tag: tag.to_string(),
                select_code: SelectCode::masked(n),
            }),
            _ => Err(ConfigError::BadSelectCode(sc.to_string())),
        }
    }
}

impl Display for DeviceSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.tag, self.select_code)
    }
}
