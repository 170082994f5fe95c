//! Restart round-trips: configured devices and plugin configuration survive.

mod common;

use std::sync::Arc;

use common::*;
use hestia_devices::{
    DeviceClassId, DeviceId, DeviceManager, HubConfig, ParamKind, ParamList, ParamType,
    ParamValue, PluginId, VendorId,
};
use hestia_storage::{MemoryBackend, StorageBackend};

struct FixedIds {
    plugin_id: PluginId,
    vendor_id: VendorId,
    class_id: DeviceClassId,
}

impl FixedIds {
    fn new() -> Self {
        Self {
            plugin_id: PluginId::new(),
            vendor_id: VendorId::new(),
            class_id: DeviceClassId::new(),
        }
    }

    /// Build "the same" plugin again, as a restarted hub would load it.
    fn plugin(&self, behavior: Arc<MockBehavior>) -> MockPlugin {
        let demo = demo_class_with_id(self.class_id, self.plugin_id, self.vendor_id);
        MockPlugin::with_ids(self.plugin_id, self.vendor_id, "persistent", behavior)
            .with_class(demo.class)
    }
}

#[tokio::test]
async fn test_device_survives_restart() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let ids = FixedIds::new();
    let device_id = DeviceId::new();

    {
        let behavior = MockBehavior::new();
        let manager = DeviceManager::new(backend.clone());
        manager.register_plugin(Box::new(ids.plugin(behavior)));
        manager.start().await.unwrap();

        manager
            .add_configured_device(
                ids.class_id,
                ParamList::new().with("n", 5i64),
                Some(device_id),
            )
            .await
            .unwrap();
        let device = manager.find_configured_device(device_id).await.unwrap();
        assert!(device.setup_complete());
        manager.shutdown().await;
    }

    // Restart: a fresh manager over the same store.
    let behavior = MockBehavior::new();
    let manager = DeviceManager::new(backend);
    manager.register_plugin(Box::new(ids.plugin(behavior.clone())));
    manager.start().await.unwrap();

    let device = manager
        .find_configured_device(device_id)
        .await
        .expect("device not restored");
    assert_eq!(device.id(), device_id);
    assert_eq!(device.device_class_id(), ids.class_id);
    assert_eq!(device.plugin_id(), ids.plugin_id);
    assert_eq!(device.name(), "Demo Switch");
    assert_eq!(device.param_value("n"), Some(&ParamValue::Int(5)));
    assert!(device.setup_complete());

    // The restored device went through plugin setup again.
    assert_eq!(
        behavior.calls_matching(|c| matches!(c, Call::SetupDevice(id) if *id == device_id)),
        1
    );
}

#[tokio::test]
async fn test_removed_device_stays_gone_after_restart() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let ids = FixedIds::new();
    let device_id = DeviceId::new();

    {
        let manager = DeviceManager::new(backend.clone());
        manager.register_plugin(Box::new(ids.plugin(MockBehavior::new())));
        manager.start().await.unwrap();
        manager
            .add_configured_device(ids.class_id, ParamList::new(), Some(device_id))
            .await
            .unwrap();
        manager.remove_configured_device(device_id).await.unwrap();
        manager.shutdown().await;
    }

    let manager = DeviceManager::new(backend);
    manager.register_plugin(Box::new(ids.plugin(MockBehavior::new())));
    manager.start().await.unwrap();
    assert!(manager.configured_devices().await.is_empty());
}

#[tokio::test]
async fn test_device_with_missing_plugin_is_retained_unconfigured() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let ids = FixedIds::new();
    let device_id = DeviceId::new();

    {
        let manager = DeviceManager::new(backend.clone());
        manager.register_plugin(Box::new(ids.plugin(MockBehavior::new())));
        manager.start().await.unwrap();
        manager
            .add_configured_device(ids.class_id, ParamList::new(), Some(device_id))
            .await
            .unwrap();
        manager.shutdown().await;
    }

    // Restart without the plugin: the device is kept (rules may reference
    // it) but never completes setup.
    let manager = DeviceManager::new(backend);
    manager.start().await.unwrap();

    let device = manager
        .find_configured_device(device_id)
        .await
        .expect("device must be retained");
    assert!(!device.setup_complete());
}

#[tokio::test]
async fn test_plugin_config_survives_restart() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let ids = FixedIds::new();
    let description = vec![ParamType::new("interval", ParamKind::Uint).with_default_value(60u64)];

    {
        let behavior = MockBehavior::new();
        let manager = DeviceManager::new(backend.clone());
        manager.register_plugin(Box::new(
            ids.plugin(behavior).with_config_description(description.clone()),
        ));
        manager.start().await.unwrap();
        manager
            .set_plugin_config(ids.plugin_id, ParamList::new().with("interval", 300u64))
            .await
            .unwrap();
        manager.shutdown().await;
    }

    let behavior = MockBehavior::new();
    let manager = DeviceManager::new(backend);
    manager.register_plugin(Box::new(
        ids.plugin(behavior.clone()).with_config_description(description),
    ));
    manager.start().await.unwrap();

    // The stored configuration, not the declared default, was applied.
    let applied: Vec<ParamList> = behavior
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::SetConfiguration(params) => Some(params),
            _ => None,
        })
        .collect();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].value("interval"), Some(&ParamValue::Uint(300)));
}

#[tokio::test]
async fn test_redb_backed_hub_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = HubConfig::default()
        .with_storage_path(dir.path().join("hub.redb"))
        .with_plugin_dirs(Vec::new());
    let ids = FixedIds::new();
    let device_id = DeviceId::new();

    {
        let manager = DeviceManager::with_config(&config).unwrap();
        manager.register_plugin(Box::new(ids.plugin(MockBehavior::new())));
        manager.start().await.unwrap();
        manager
            .add_configured_device(
                ids.class_id,
                ParamList::new().with("n", 9i64),
                Some(device_id),
            )
            .await
            .unwrap();
        manager.shutdown().await;
    }

    let manager = DeviceManager::with_config(&config).unwrap();
    manager.register_plugin(Box::new(ids.plugin(MockBehavior::new())));
    manager.start().await.unwrap();

    let device = manager.find_configured_device(device_id).await.unwrap();
    assert_eq!(device.param_value("n"), Some(&ParamValue::Int(9)));
}
