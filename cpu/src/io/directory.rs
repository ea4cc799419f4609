use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display, Formatter};

use tracing::{event, Level};

use base::prelude::*;

use super::Device;

/// Identifies one attachment of one peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u32);

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct AttachedDevice {
    pub id: DeviceId,
    pub name: String,
    pub device: Box<dyn Device>,
    /// The device's busy line.
    pub busy: bool,
}

impl Debug for AttachedDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachedDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("busy", &self.busy)
            .finish()
    }
}

/// The peripherals on the bus, by select code.  Several may share a
/// select code, as on the real party-line bus; they are kept in the
/// order they were attached.
#[derive(Debug, Default)]
pub struct DeviceDirectory {
    devices: BTreeMap<SelectCode, Vec<AttachedDevice>>,
    next_id: u32,
}

impl DeviceDirectory {
    pub fn new() -> DeviceDirectory {
        DeviceDirectory::default()
    }

    pub fn attach(&mut self, sc: SelectCode, device: Box<dyn Device>) -> DeviceId {
        let id = DeviceId(self.next_id);
        self.next_id += 1;
        let name = device.name().to_string();
        event!(Level::INFO, "attaching {} at select code {} as {}", name, sc, id);
        self.devices.entry(sc).or_default().push(AttachedDevice {
            id,
            name,
            device,
            busy: false,
        });
        id
    }

    /// Removes every device called `name`, returning the ids removed.
    pub fn detach(&mut self, name: &str) -> Vec<DeviceId> {
        let mut removed = Vec::new();
        for list in self.devices.values_mut() {
            list.retain(|d| {
                if d.name == name {
                    removed.push(d.id);
                    false
                } else {
                    true
                }
            });
        }
        self.devices.retain(|_, list| !list.is_empty());
        for id in removed.iter() {
            event!(Level::INFO, "detached {} ({})", name, id);
        }
        removed
    }

    pub fn at(&self, sc: SelectCode) -> &[AttachedDevice] {
        self.devices.get(&sc).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn at_mut(&mut self, sc: SelectCode) -> &mut [AttachedDevice] {
        self.devices
            .get_mut(&sc)
            .map(Vec::as_mut_slice)
            .unwrap_or_default()
    }

    pub fn find_mut(&mut self, id: DeviceId) -> Option<(SelectCode, &mut AttachedDevice)> {
        self.devices.iter_mut().find_map(|(sc, list)| {
            list.iter_mut()
                .find(|d| d.id == id)
                .map(|d| (*sc, d))
        })
    }

    /// True if any device at `sc` holds its busy line.
    pub fn is_busy(&self, sc: SelectCode) -> bool {
        self.at(sc).iter().any(|d| d.busy)
    }

    /// Every attached device in select code order.
    pub fn iter(&self) -> impl Iterator<Item = (SelectCode, &AttachedDevice)> {
        self.devices
            .iter()
            .flat_map(|(sc, list)| list.iter().map(move |d| (*sc, d)))
    }

    pub fn reset_all(&mut self) {
        for d in self.devices.values_mut().flat_map(|list| list.iter_mut()) {
            d.device.reset();
            d.busy = false;
        }
    }

    pub fn len(&self) -> usize {
        self.devices.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
