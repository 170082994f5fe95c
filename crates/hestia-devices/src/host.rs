//! Plugin loading and the global catalogs.
//!
//! The host locates candidate plugin artifacts under the configured search
//! paths, loads them, verifies their metadata (`name`, `id` and `vendors`
//! are required; malformed artifacts are skipped with a warning) and absorbs
//! their vendors and device classes into the global catalogs. Statically
//! built-in plugins register through the same path, minus the dynamic
//! loading.

use std::collections::HashMap;
use std::ffi::c_char;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::hardware::HardwareResources;
use crate::ids::{DeviceClassId, PluginId, VendorId};
use crate::plugin::{DevicePlugin, DynDevicePlugin, PluginMetadata};
use crate::types::{DeviceClass, Vendor};

/// ABI version native plugin artifacts must report.
pub const PLUGIN_ABI_VERSION: u32 = 1;

const SYMBOL_ABI_VERSION: &[u8] = b"hestia_plugin_abi_version\0";
const SYMBOL_METADATA: &[u8] = b"hestia_plugin_metadata\0";
const SYMBOL_CREATE: &[u8] = b"hestia_plugin_create\0";

/// Why a plugin artifact could not be loaded or registered.
#[derive(Debug, thiserror::Error)]
pub enum PluginLoadError {
    #[error("not a plugin artifact: {0}")]
    NotAnArtifact(String),

    #[error("failed to load artifact: {0}")]
    Artifact(String),

    #[error("incompatible plugin ABI: expected {expected}, got {got}")]
    AbiMismatch { expected: u32, got: u32 },

    #[error("missing symbol: {0}")]
    SymbolNotFound(String),

    #[error("incomplete metadata, missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("artifact metadata id {artifact} does not match plugin id {plugin}")]
    IdMismatch { artifact: PluginId, plugin: PluginId },

    #[error("plugin id already registered: {0}")]
    DuplicatePlugin(PluginId),
}

/// Parse and verify plugin metadata from its JSON form.
pub fn parse_metadata(value: &serde_json::Value) -> Result<PluginMetadata, PluginLoadError> {
    for field in ["name", "id", "vendors"] {
        if value.get(field).is_none() {
            return Err(PluginLoadError::MissingField(match field {
                "name" => "name",
                "id" => "id",
                _ => "vendors",
            }));
        }
    }
    serde_json::from_value(value.clone())
        .map_err(|e| PluginLoadError::InvalidMetadata(e.to_string()))
}

fn verify_metadata(metadata: &PluginMetadata) -> Result<(), PluginLoadError> {
    if metadata.name.is_empty() {
        return Err(PluginLoadError::MissingField("name"));
    }
    if metadata.id.0.is_nil() {
        return Err(PluginLoadError::MissingField("id"));
    }
    Ok(())
}

/// A plugin the host has loaded, together with its artifact handle.
pub struct LoadedPlugin {
    plugin: DynDevicePlugin,
    metadata: PluginMetadata,
    required_hardware: HardwareResources,
    path: Option<PathBuf>,
    /// Keeps the artifact mapped for as long as the plugin lives. Must be
    /// dropped after `plugin`.
    _library: Option<libloading::Library>,
}

impl LoadedPlugin {
    pub fn plugin_id(&self) -> PluginId {
        self.metadata.id
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    /// Hardware this plugin is interested in: its own declaration plus the
    /// union of its device classes' requirements.
    pub fn required_hardware(&self) -> HardwareResources {
        self.required_hardware
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn handle(&self) -> DynDevicePlugin {
        Arc::clone(&self.plugin)
    }
}

/// Holds the loaded plugins (in load order) and the vendor / device-class
/// catalogs they contributed.
#[derive(Default)]
pub struct PluginHost {
    plugins: Vec<LoadedPlugin>,
    vendors: HashMap<VendorId, Vendor>,
    device_classes: HashMap<DeviceClassId, DeviceClass>,
    vendor_devices: HashMap<VendorId, Vec<DeviceClassId>>,
}

impl PluginHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin and absorb its catalog entries.
    ///
    /// On vendor-id collision between plugins the later vendor is ignored.
    /// A device class whose vendor is unknown is rejected.
    pub fn add(
        &mut self,
        plugin: Box<dyn DevicePlugin>,
        path: Option<PathBuf>,
        library: Option<libloading::Library>,
    ) -> Result<PluginId, PluginLoadError> {
        let metadata = plugin.metadata().clone();
        verify_metadata(&metadata)?;
        if self.plugin(metadata.id).is_some() {
            return Err(PluginLoadError::DuplicatePlugin(metadata.id));
        }

        info!(plugin = %metadata.name, id = %metadata.id, "loaded plugin");

        for vendor in &metadata.vendors {
            if self.vendors.contains_key(&vendor.id) {
                warn!(vendor = %vendor.name, "duplicate vendor, ignoring");
                continue;
            }
            debug!(vendor = %vendor.name, "loaded vendor");
            self.vendors.insert(vendor.id, vendor.clone());
        }

        let mut class_hardware = HardwareResources::empty();
        for class in plugin.supported_devices() {
            if class.plugin_id != metadata.id {
                warn!(class = %class.name, "device class does not belong to this plugin, ignoring");
                continue;
            }
            if !self.vendors.contains_key(&class.vendor_id) {
                warn!(
                    class = %class.name,
                    vendor_id = %class.vendor_id,
                    "vendor not found, ignoring device class"
                );
                continue;
            }
            if self.device_classes.contains_key(&class.id) {
                warn!(class = %class.name, "duplicate device class, ignoring");
                continue;
            }
            debug!(class = %class.name, "loaded device class");
            class_hardware |= class.required_hardware;
            self.vendor_devices
                .entry(class.vendor_id)
                .or_default()
                .push(class.id);
            self.device_classes.insert(class.id, class);
        }

        let required_hardware = plugin.required_hardware() | class_hardware;
        let id = metadata.id;
        self.plugins.push(LoadedPlugin {
            plugin: Arc::new(RwLock::new(plugin)),
            metadata,
            required_hardware,
            path,
            _library: library,
        });
        Ok(id)
    }

    /// All loaded plugins, in load order.
    pub fn plugins(&self) -> &[LoadedPlugin] {
        &self.plugins
    }

    pub fn plugin(&self, id: PluginId) -> Option<&LoadedPlugin> {
        self.plugins.iter().find(|p| p.plugin_id() == id)
    }

    pub(crate) fn plugin_handle(&self, id: PluginId) -> Option<DynDevicePlugin> {
        self.plugin(id).map(LoadedPlugin::handle)
    }

    pub fn supported_vendors(&self) -> Vec<Vendor> {
        self.vendors.values().cloned().collect()
    }

    /// All supported device classes, optionally filtered by vendor.
    pub fn supported_devices(&self, vendor_id: Option<VendorId>) -> Vec<DeviceClass> {
        match vendor_id {
            None => self.device_classes.values().cloned().collect(),
            Some(vendor_id) => self
                .vendor_devices
                .get(&vendor_id)
                .into_iter()
                .flatten()
                .filter_map(|id| self.device_classes.get(id).cloned())
                .collect(),
        }
    }

    pub fn find_device_class(&self, id: DeviceClassId) -> Option<DeviceClass> {
        self.device_classes.get(&id).cloned()
    }

    pub(crate) fn plugin_requires(&self, id: PluginId, resources: HardwareResources) -> bool {
        self.plugin(id)
            .map(|p| p.required_hardware().intersects(resources))
            .unwrap_or(false)
    }

    /// Plugins interested in the given resources, in load order.
    pub(crate) fn plugins_requiring(
        &self,
        resources: HardwareResources,
    ) -> Vec<(PluginId, DynDevicePlugin)> {
        self.plugins
            .iter()
            .filter(|p| p.required_hardware().intersects(resources))
            .map(|p| (p.plugin_id(), p.handle()))
            .collect()
    }
}

/// A plugin freshly loaded from a native artifact.
pub struct NativeArtifact {
    pub path: PathBuf,
    pub library: libloading::Library,
    pub plugin: Box<dyn DevicePlugin>,
    pub metadata: PluginMetadata,
}

/// Loader for native plugin artifacts (`.so`, `.dylib`, `.dll`).
///
/// An artifact exposes three C symbols: `hestia_plugin_abi_version`
/// returning [`PLUGIN_ABI_VERSION`], `hestia_plugin_metadata` returning a
/// NUL-terminated JSON document, and `hestia_plugin_create` returning a
/// heap-allocated `Box<dyn DevicePlugin>`.
pub struct NativePluginLoader;

impl NativePluginLoader {
    /// Scan the search directories and load every valid artifact. Invalid
    /// or malformed artifacts are skipped with a warning.
    pub fn scan(dirs: &[PathBuf]) -> Vec<NativeArtifact> {
        let mut artifacts = Vec::new();
        for dir in dirs {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "skipping plugin search path");
                    continue;
                }
            };
            info!(dir = %dir.display(), "loading plugins");
            for entry in entries.flatten() {
                let path = entry.path();
                match Self::load(&path) {
                    Ok(artifact) => artifacts.push(artifact),
                    Err(PluginLoadError::NotAnArtifact(_)) => {}
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping plugin artifact");
                    }
                }
            }
        }
        artifacts
    }

    /// Load one artifact.
    pub fn load(path: &Path) -> Result<NativeArtifact, PluginLoadError> {
        let extension = path.extension().and_then(|e| e.to_str());
        if !matches!(extension, Some("so") | Some("dylib") | Some("dll")) {
            return Err(PluginLoadError::NotAnArtifact(path.display().to_string()));
        }

        debug!(path = %path.display(), "loading native plugin");

        let library = unsafe { libloading::Library::new(path) }
            .map_err(|e| PluginLoadError::Artifact(e.to_string()))?;

        let abi_version: libloading::Symbol<unsafe extern "C" fn() -> u32> = unsafe {
            library
                .get(SYMBOL_ABI_VERSION)
                .map_err(|e| PluginLoadError::SymbolNotFound(e.to_string()))?
        };
        let got = unsafe { abi_version() };
        if got != PLUGIN_ABI_VERSION {
            return Err(PluginLoadError::AbiMismatch {
                expected: PLUGIN_ABI_VERSION,
                got,
            });
        }

        let metadata_fn: libloading::Symbol<unsafe extern "C" fn() -> *const c_char> = unsafe {
            library
                .get(SYMBOL_METADATA)
                .map_err(|e| PluginLoadError::SymbolNotFound(e.to_string()))?
        };
        let raw = unsafe { metadata_fn() };
        if raw.is_null() {
            return Err(PluginLoadError::InvalidMetadata("null metadata".to_string()));
        }
        let json = unsafe { std::ffi::CStr::from_ptr(raw) }
            .to_str()
            .map_err(|e| PluginLoadError::InvalidMetadata(e.to_string()))?;
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| PluginLoadError::InvalidMetadata(e.to_string()))?;
        let metadata = parse_metadata(&value)?;

        let create: libloading::Symbol<unsafe extern "C" fn() -> *mut Box<dyn DevicePlugin>> = unsafe {
            library
                .get(SYMBOL_CREATE)
                .map_err(|e| PluginLoadError::SymbolNotFound(e.to_string()))?
        };
        let raw = unsafe { create() };
        if raw.is_null() {
            return Err(PluginLoadError::Artifact(
                "plugin create function returned null".to_string(),
            ));
        }
        let plugin = *unsafe { Box::from_raw(raw) };

        if plugin.metadata().id != metadata.id {
            return Err(PluginLoadError::IdMismatch {
                artifact: metadata.id,
                plugin: plugin.metadata().id,
            });
        }

        Ok(NativeArtifact {
            path: path.to_path_buf(),
            library,
            plugin,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct CatalogPlugin {
        metadata: PluginMetadata,
        classes: Vec<DeviceClass>,
    }

    #[async_trait]
    impl DevicePlugin for CatalogPlugin {
        fn metadata(&self) -> &PluginMetadata {
            &self.metadata
        }

        fn supported_devices(&self) -> Vec<DeviceClass> {
            self.classes.clone()
        }
    }

    fn plugin_with_class(vendor: Vendor) -> (Box<dyn DevicePlugin>, DeviceClassId) {
        let plugin_id = PluginId::new();
        let class = DeviceClass::new(DeviceClassId::new(), plugin_id, vendor.id, "Switch");
        let class_id = class.id;
        let plugin = CatalogPlugin {
            metadata: PluginMetadata::new(plugin_id, "catalog").with_vendor(vendor),
            classes: vec![class],
        };
        (Box::new(plugin), class_id)
    }

    #[test]
    fn test_absorbs_vendor_and_classes() {
        let mut host = PluginHost::new();
        let vendor = Vendor::new(VendorId::new(), "Acme");
        let (plugin, class_id) = plugin_with_class(vendor.clone());

        let plugin_id = host.add(plugin, None, None).unwrap();
        assert_eq!(host.plugins().len(), 1);
        assert_eq!(host.supported_vendors(), vec![vendor.clone()]);
        assert!(host.find_device_class(class_id).is_some());
        assert_eq!(host.supported_devices(Some(vendor.id)).len(), 1);
        assert_eq!(host.supported_devices(Some(VendorId::new())).len(), 0);
        assert!(host.plugin(plugin_id).is_some());
    }

    #[test]
    fn test_vendor_collision_keeps_first() {
        let mut host = PluginHost::new();
        let vendor_id = VendorId::new();
        let (first, _) = plugin_with_class(Vendor::new(vendor_id, "First"));
        let (second, second_class) = plugin_with_class(Vendor::new(vendor_id, "Second"));

        host.add(first, None, None).unwrap();
        host.add(second, None, None).unwrap();

        let vendors = host.supported_vendors();
        assert_eq!(vendors.len(), 1);
        assert_eq!(vendors[0].name, "First");
        // The second plugin's class still resolves, its vendor id is known.
        assert!(host.find_device_class(second_class).is_some());
    }

    #[test]
    fn test_class_with_unknown_vendor_is_rejected() {
        let mut host = PluginHost::new();
        let plugin_id = PluginId::new();
        let class = DeviceClass::new(DeviceClassId::new(), plugin_id, VendorId::new(), "Orphan");
        let class_id = class.id;
        let plugin = CatalogPlugin {
            metadata: PluginMetadata::new(plugin_id, "no-vendor"),
            classes: vec![class],
        };

        host.add(Box::new(plugin), None, None).unwrap();
        assert!(host.find_device_class(class_id).is_none());
    }

    #[test]
    fn test_metadata_parsing_requires_fields() {
        let missing_vendors = json!({
            "name": "demo",
            "id": PluginId::new().to_string(),
        });
        assert!(matches!(
            parse_metadata(&missing_vendors),
            Err(PluginLoadError::MissingField("vendors"))
        ));

        let complete = json!({
            "name": "demo",
            "id": PluginId::new().to_string(),
            "vendors": [{"id": VendorId::new().to_string(), "name": "Acme"}],
        });
        let metadata = parse_metadata(&complete).unwrap();
        assert_eq!(metadata.name, "demo");
        assert_eq!(metadata.vendors.len(), 1);
    }

    #[test]
    fn test_duplicate_plugin_rejected() {
        let mut host = PluginHost::new();
        let vendor = Vendor::new(VendorId::new(), "Acme");
        let (first, _) = plugin_with_class(vendor.clone());
        let id = host.add(first, None, None).unwrap();

        let clash = CatalogPlugin {
            metadata: PluginMetadata::new(id, "clash"),
            classes: Vec::new(),
        };
        assert!(matches!(
            host.add(Box::new(clash), None, None),
            Err(PluginLoadError::DuplicatePlugin(_))
        ));
    }
}
