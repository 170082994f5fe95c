//! In-memory registry of configured devices.
//!
//! The registry is the single owner of all [`Device`] values. Callers get
//! clones; plugins get borrows scoped to a single call. Persistence is the
//! orchestrator's job, not the registry's.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::device::Device;
use crate::error::{DeviceError, DeviceResult};
use crate::ids::{DeviceClassId, DeviceId, StateTypeId};
use crate::params::ParamValue;

#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceId, Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device. Fails with [`DeviceError::DuplicateUuid`] when the id
    /// is already taken.
    pub async fn insert(&self, device: Device) -> DeviceResult<()> {
        let mut devices = self.devices.write().await;
        if devices.contains_key(&device.id()) {
            return Err(DeviceError::DuplicateUuid(device.id()));
        }
        devices.insert(device.id(), device);
        Ok(())
    }

    /// Replace an existing entry or add a new one.
    pub async fn upsert(&self, device: Device) {
        self.devices.write().await.insert(device.id(), device);
    }

    pub async fn contains(&self, id: DeviceId) -> bool {
        self.devices.read().await.contains_key(&id)
    }

    pub async fn get(&self, id: DeviceId) -> Option<Device> {
        self.devices.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: DeviceId) -> Option<Device> {
        self.devices.write().await.remove(&id)
    }

    pub async fn all(&self) -> Vec<Device> {
        self.devices.read().await.values().cloned().collect()
    }

    pub async fn by_class(&self, device_class_id: DeviceClassId) -> Vec<Device> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.device_class_id() == device_class_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Update one state value and return the updated device.
    pub async fn set_state_value(
        &self,
        device_id: DeviceId,
        state_type_id: StateTypeId,
        value: ParamValue,
    ) -> DeviceResult<Device> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(&device_id)
            .ok_or(DeviceError::DeviceNotFound(device_id))?;
        if !device.set_state_value(state_type_id, value) {
            return Err(DeviceError::StateTypeNotFound(state_type_id));
        }
        Ok(device.clone())
    }
}
