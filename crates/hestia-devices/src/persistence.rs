//! Persisted layout of configured devices and plugin configuration.
//!
//! Two groups are used, stable across restarts:
//!
//! ```text
//! DeviceConfig/
//!   <device-uuid>/
//!     devicename    : string
//!     deviceClassId : uuid
//!     pluginid      : uuid
//!     Params/<name> : tagged primitive
//! PluginConfig/
//!   <plugin-uuid>/<name> : tagged primitive
//! ```
//!
//! Values are JSON-encoded [`ParamValue`]s (the discriminator is preserved)
//! except for the three fixed device keys, which are plain JSON strings.
//! A device is written in a single storage transaction: it is either fully
//! present or absent.

use std::collections::BTreeMap;
use std::sync::Arc;

use hestia_storage::{Error as StorageError, StorageBackend};
use tracing::warn;

use crate::device::Device;
use crate::ids::{DeviceClassId, DeviceId, PluginId};
use crate::params::{Param, ParamList, ParamValue};

const DEVICE_TABLE: &str = "DeviceConfig";
const PLUGIN_TABLE: &str = "PluginConfig";

const KEY_NAME: &str = "devicename";
const KEY_CLASS: &str = "deviceClassId";
const KEY_PLUGIN: &str = "pluginid";
const PARAMS_GROUP: &str = "Params";

/// A device record as read back from the store, before it is re-attached to
/// the catalog.
#[derive(Debug, Clone)]
pub struct StoredDevice {
    pub id: DeviceId,
    pub name: String,
    pub device_class_id: DeviceClassId,
    pub plugin_id: PluginId,
    pub params: ParamList,
}

/// Reads and writes configured-device and plugin-config records.
pub struct DeviceConfigStore {
    backend: Arc<dyn StorageBackend>,
}

impl DeviceConfigStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Persist one device atomically.
    pub fn store_device(&self, device: &Device) -> Result<(), StorageError> {
        let prefix = device.id().to_string();
        let mut items = vec![
            (
                format!("{}/{}", prefix, KEY_NAME),
                encode_string(device.name())?,
            ),
            (
                format!("{}/{}", prefix, KEY_CLASS),
                encode_string(&device.device_class_id().to_string())?,
            ),
            (
                format!("{}/{}", prefix, KEY_PLUGIN),
                encode_string(&device.plugin_id().to_string())?,
            ),
        ];
        for param in device.params() {
            items.push((
                format!("{}/{}/{}", prefix, PARAMS_GROUP, param.name),
                encode_value(&param.value)?,
            ));
        }
        self.backend.write_batch(DEVICE_TABLE, items)
    }

    /// Remove every key of one device.
    pub fn remove_device(&self, id: DeviceId) -> Result<(), StorageError> {
        self.backend
            .delete_prefix(DEVICE_TABLE, &format!("{}/", id))?;
        Ok(())
    }

    /// Load all persisted devices. Records that fail to parse are skipped
    /// with a warning rather than aborting the whole load.
    pub fn load_devices(&self) -> Result<Vec<StoredDevice>, StorageError> {
        let entries = self.backend.scan(DEVICE_TABLE, "")?;

        let mut groups: BTreeMap<String, Vec<(String, Vec<u8>)>> = BTreeMap::new();
        for (key, value) in entries {
            match key.split_once('/') {
                Some((id, rest)) => groups
                    .entry(id.to_string())
                    .or_default()
                    .push((rest.to_string(), value)),
                None => warn!(%key, "ignoring stray device config key"),
            }
        }

        let mut devices = Vec::new();
        for (id_string, entries) in groups {
            match parse_device(&id_string, entries) {
                Ok(device) => devices.push(device),
                Err(reason) => {
                    warn!(device = %id_string, %reason, "skipping unreadable device record");
                }
            }
        }
        Ok(devices)
    }

    /// Persist a plugin's configuration.
    pub fn store_plugin_config(
        &self,
        plugin_id: PluginId,
        params: &ParamList,
    ) -> Result<(), StorageError> {
        let prefix = plugin_id.to_string();
        self.backend
            .delete_prefix(PLUGIN_TABLE, &format!("{}/", prefix))?;
        let items = params
            .iter()
            .map(|p| Ok((format!("{}/{}", prefix, p.name), encode_value(&p.value)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;
        self.backend.write_batch(PLUGIN_TABLE, items)
    }

    /// Load a plugin's stored configuration. `None` when nothing is stored.
    pub fn load_plugin_config(&self, plugin_id: PluginId) -> Result<Option<ParamList>, StorageError> {
        let prefix = format!("{}/", plugin_id);
        let entries = self.backend.scan(PLUGIN_TABLE, &prefix)?;
        if entries.is_empty() {
            return Ok(None);
        }

        let mut params = ParamList::new();
        for (key, bytes) in entries {
            let name = &key[prefix.len()..];
            match decode_value(&bytes) {
                Ok(value) => params.set(Param::new(name, value)),
                Err(reason) => {
                    warn!(plugin = %plugin_id, name, %reason, "skipping unreadable plugin config value");
                }
            }
        }
        Ok(Some(params))
    }
}

fn encode_string(value: &str) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn encode_value(value: &ParamValue) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode_string(bytes: &[u8]) -> Result<String, String> {
    serde_json::from_slice(bytes).map_err(|e| e.to_string())
}

fn decode_value(bytes: &[u8]) -> Result<ParamValue, String> {
    serde_json::from_slice(bytes).map_err(|e| e.to_string())
}

fn parse_device(
    id_string: &str,
    entries: Vec<(String, Vec<u8>)>,
) -> Result<StoredDevice, String> {
    let id = DeviceId::from_string(id_string).map_err(|e| e.to_string())?;

    let mut name = None;
    let mut class_id = None;
    let mut plugin_id = None;
    let mut params = ParamList::new();

    let params_prefix = format!("{}/", PARAMS_GROUP);
    for (key, bytes) in entries {
        match key.as_str() {
            KEY_NAME => name = Some(decode_string(&bytes)?),
            KEY_CLASS => {
                class_id =
                    Some(DeviceClassId::from_string(&decode_string(&bytes)?).map_err(|e| e.to_string())?)
            }
            KEY_PLUGIN => {
                plugin_id =
                    Some(PluginId::from_string(&decode_string(&bytes)?).map_err(|e| e.to_string())?)
            }
            _ => {
                if let Some(param_name) = key.strip_prefix(&params_prefix) {
                    params.set(Param::new(param_name, decode_value(&bytes)?));
                }
            }
        }
    }

    Ok(StoredDevice {
        id,
        name: name.ok_or("missing devicename")?,
        device_class_id: class_id.ok_or("missing deviceClassId")?,
        plugin_id: plugin_id.ok_or("missing pluginid")?,
        params,
    })
}
