//! Capture device enumeration and selection.

use tracing::debug;

use crate::config::DeviceQuery;
use crate::traits::{CameraBackend, CameraError, DeviceInfo, Result};

/// Resolves device queries against a backend's device list.
pub struct DeviceCatalog<'a, B: CameraBackend> {
    backend: &'a B,
}

impl<'a, B: CameraBackend> DeviceCatalog<'a, B> {
    /// Create a catalog over `backend`.
    pub const fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// List capture devices in discovery order.
    pub fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let devices = self.backend.enumerate()?;
        debug!(count = devices.len(), "enumerated capture devices");
        Ok(devices)
    }

    /// Resolve `query` to a single device.
    ///
    /// A query that matches nothing yields `CameraError::DeviceNotFound`,
    /// or `CameraError::NoDevices` when the device list is empty.
    pub fn resolve(&self, query: &DeviceQuery) -> Result<DeviceInfo> {
        let devices = self.enumerate()?;
        if devices.is_empty() {
            return Err(CameraError::NoDevices);
        }
        select(devices, query).ok_or_else(|| CameraError::DeviceNotFound(query.clone()))
    }
}

/// Pick the device `query` refers to from `devices` (in discovery order).
pub fn select(mut devices: Vec<DeviceInfo>, query: &DeviceQuery) -> Option<DeviceInfo> {
    match query {
        DeviceQuery::Default => devices.into_iter().next(),
        DeviceQuery::Index(index) => {
            devices.sort_by(|a, b| a.name.cmp(&b.name));
            devices.into_iter().nth(*index)
        }
        DeviceQuery::Name(name) => devices.into_iter().find(|device| device.name == *name),
    }
}
