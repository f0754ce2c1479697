//! `Identifier`: the device population, keyed by uid.
//!
//! Grounded on the donor allocator's shared channel table
//! (`Arc<Mutex<HashMap<..>>>` in `communication/src/allocator/process.rs`):
//! devices live behind `Arc<Mutex<Device>>` so a parallel-batch round can
//! hold one device's lock while another thread holds a different device's,
//! and neighbour references are always resolved back through this arena by
//! uid rather than passed around as raw handles.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::device::{Device, Position};
use crate::{ConfigError, Time, Uid};

/// A locked handle to one device. Cloning is cheap (an `Arc` bump); locking
/// it blocks only against another clone of the same handle.
pub type DeviceHandle = Arc<Mutex<Device>>;

/// Owns the device population for one net: spawns, looks up, and removes
/// devices by uid.
#[derive(Default)]
pub struct Identifier {
    devices: BTreeMap<Uid, DeviceHandle>,
}

impl Identifier {
    pub fn new() -> Self {
        Identifier { devices: BTreeMap::new() }
    }

    /// Spawns a new device with uid `uid`. Errors if the uid is already in
    /// use, since uids must be unique for neighbour references to resolve
    /// unambiguously.
    pub fn spawn(&mut self, uid: Uid, position: Option<Position>, start_time: Time) -> Result<DeviceHandle, ConfigError> {
        if self.devices.contains_key(&uid) {
            return Err(ConfigError::DuplicateUid(uid));
        }
        let device = Arc::new(Mutex::new(Device::new(uid, position, start_time)));
        self.devices.insert(uid, Arc::clone(&device));
        Ok(device)
    }

    /// Removes a device from the population. Its handle remains valid for
    /// anyone still holding a clone, but no further lookups by uid will find
    /// it.
    pub fn remove(&mut self, uid: Uid) -> Option<DeviceHandle> {
        self.devices.remove(&uid)
    }

    pub fn get(&self, uid: Uid) -> Option<DeviceHandle> {
        self.devices.get(&uid).cloned()
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.devices.contains_key(&uid)
    }

    pub fn uids(&self) -> impl Iterator<Item = Uid> + '_ {
        self.devices.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
