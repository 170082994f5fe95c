//! The device manager: single entry point for everything device-related.
//!
//! The manager composes the plugin host, device registry, hardware bus,
//! persistence and notification bus into the API surface consumed by outer
//! servers. All asynchronous completions, from plugins and from hardware
//! transports alike, arrive on one queue and are processed by a single pump task,
//! which serialises every mutation of the discovery pool, the pending
//! tables and device state.
//!
//! Calls into a plugin that may complete asynchronously park a continuation
//! first (keyed by device id for setup, pairing transaction id for pairing,
//! action id for actions). A completion notification consumes exactly one
//! continuation; unmatched completions are logged and discarded.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use hestia_storage::StorageBackend;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::device::{Device, State};
use crate::error::{DeviceError, DeviceResult, Outcome, SetupStatus};
use crate::event::{Action, Event};
use crate::hardware::{HardwareBus, HardwareEvent, HardwareResources, RadioBand, UpnpDeviceDescriptor};
use crate::host::{NativePluginLoader, PluginHost};
use crate::ids::{
    ActionId, DeviceClassId, DeviceDescriptorId, DeviceId, PairingTransactionId, PluginId,
    StateTypeId, VendorId,
};
use crate::notifications::{HubNotification, NotificationBus, NotificationReceiver};
use crate::params::{Param, ParamList, ParamValue};
use crate::persistence::DeviceConfigStore;
use crate::plugin::{
    DevicePlugin, DiscoveryResponse, PluginContext, PluginMetadata, PluginNotification,
};
use crate::registry::DeviceRegistry;
use crate::types::{CreateMethods, DeviceClass, DeviceDescriptor, SetupMethod, Vendor};
use crate::validator::verify_params;

/// A message on the orchestrator's queue.
#[derive(Debug)]
pub(crate) enum HubMessage {
    Plugin(PluginId, PluginNotification),
    Hardware(HardwareEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetupOrigin {
    /// A freshly created device; discarded if setup fails.
    New,
    /// Restored from the store at startup; retained non-functional if setup
    /// fails.
    Restore,
}

struct PendingSetup {
    device: Device,
    origin: SetupOrigin,
}

/// What a pairing transaction is bound to: exactly one of caller-supplied
/// params or a discovered descriptor.
enum PairingPayload {
    Params(ParamList),
    Descriptor(DeviceDescriptorId),
}

struct PairingTransaction {
    device_class_id: DeviceClassId,
    payload: PairingPayload,
}

struct Inner {
    host: RwLock<PluginHost>,
    registry: DeviceRegistry,
    store: DeviceConfigStore,
    bus: NotificationBus,
    hardware: HardwareBus,
    /// Live pool of discovered descriptors, keyed by descriptor id.
    discovered: RwLock<HashMap<DeviceDescriptorId, DeviceDescriptor>>,
    /// Count of in-flight async discoveries per class.
    discoveries_in_flight: RwLock<HashMap<DeviceClassId, usize>>,
    /// Plugins with an active discovery; these also receive radio frames.
    discovering_plugins: RwLock<Vec<PluginId>>,
    pending_setups: RwLock<HashMap<DeviceId, PendingSetup>>,
    pending_pairings: RwLock<HashMap<PairingTransactionId, PairingTransaction>>,
    pending_actions: RwLock<HashSet<ActionId>>,
    msg_tx: mpsc::UnboundedSender<HubMessage>,
}

/// The orchestrator façade.
pub struct DeviceManager {
    inner: Arc<Inner>,
    plugin_dirs: StdMutex<Vec<PathBuf>>,
    staged_plugins: StdMutex<Vec<Box<dyn DevicePlugin>>>,
    msg_rx: StdMutex<Option<mpsc::UnboundedReceiver<HubMessage>>>,
    pump: StdMutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl DeviceManager {
    /// Create a manager persisting through the given backend.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            host: RwLock::new(PluginHost::new()),
            registry: DeviceRegistry::new(),
            store: DeviceConfigStore::new(backend),
            bus: NotificationBus::new(),
            hardware: HardwareBus::new(msg_tx.clone()),
            discovered: RwLock::new(HashMap::new()),
            discoveries_in_flight: RwLock::new(HashMap::new()),
            discovering_plugins: RwLock::new(Vec::new()),
            pending_setups: RwLock::new(HashMap::new()),
            pending_pairings: RwLock::new(HashMap::new()),
            pending_actions: RwLock::new(HashSet::new()),
            msg_tx,
        });
        Self {
            inner,
            plugin_dirs: StdMutex::new(Vec::new()),
            staged_plugins: StdMutex::new(Vec::new()),
            msg_rx: StdMutex::new(Some(msg_rx)),
            pump: StdMutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Create a manager from a [`HubConfig`], opening its redb store.
    pub fn with_config(config: &HubConfig) -> hestia_storage::Result<Self> {
        let backend = Arc::new(hestia_storage::RedbBackend::open(
            config.storage_path.display().to_string(),
        )?);
        let manager = Self::new(backend);
        for dir in &config.plugin_dirs {
            manager.add_plugin_search_path(dir.clone());
        }
        Ok(manager)
    }

    /// Add a directory to scan for native plugin artifacts on
    /// [`start`](Self::start).
    pub fn add_plugin_search_path(&self, dir: PathBuf) {
        self.plugin_dirs.lock().expect("manager lock poisoned").push(dir);
    }

    /// Register a statically built-in plugin. Must be called before
    /// [`start`](Self::start).
    pub fn register_plugin(&self, plugin: Box<dyn DevicePlugin>) {
        self.staged_plugins
            .lock()
            .expect("manager lock poisoned")
            .push(plugin);
    }

    /// Subscribe to the orchestrator's notifications.
    pub fn subscribe(&self) -> NotificationReceiver {
        self.inner.bus.subscribe()
    }

    /// The shared hardware bus; transports push raw stimuli through it.
    pub fn hardware(&self) -> &HardwareBus {
        &self.inner.hardware
    }

    /// Load plugins and configured devices, start monitoring auto devices
    /// and begin processing completions. Publishes
    /// [`HubNotification::Loaded`] exactly once, after plugin load and
    /// configured-device load have both completed.
    pub async fn start(&self) -> DeviceResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("device manager already started");
            return Ok(());
        }

        self.load_plugins().await;
        self.inner.load_configured_devices().await;
        self.start_monitoring_auto_devices().await;

        let rx = self
            .msg_rx
            .lock()
            .expect("manager lock poisoned")
            .take()
            .expect("message receiver consumed twice");
        let inner = Arc::clone(&self.inner);
        let pump = tokio::spawn(async move {
            let mut rx = rx;
            while let Some(msg) = rx.recv().await {
                inner.handle_message(msg).await;
            }
        });
        *self.pump.lock().expect("manager lock poisoned") = Some(pump);

        info!("device manager loaded");
        self.inner.bus.publish(HubNotification::Loaded);
        Ok(())
    }

    /// Stop processing completions and tear down the hardware bus. Waits
    /// for the pump so every resource (including the store) is released
    /// when this returns.
    pub async fn shutdown(&self) {
        let pump = self.pump.lock().expect("manager lock poisoned").take();
        if let Some(pump) = pump {
            pump.abort();
            let _ = pump.await;
        }
        self.inner.hardware.shutdown();
    }

    async fn load_plugins(&self) {
        let staged: Vec<Box<dyn DevicePlugin>> = self
            .staged_plugins
            .lock()
            .expect("manager lock poisoned")
            .drain(..)
            .collect();
        let dirs = self.plugin_dirs.lock().expect("manager lock poisoned").clone();
        let artifacts = NativePluginLoader::scan(&dirs);

        let mut loaded = Vec::new();
        {
            let mut host = self.inner.host.write().await;
            for plugin in staged {
                let name = plugin.metadata().name.clone();
                match host.add(plugin, None, None) {
                    Ok(id) => loaded.push(id),
                    Err(e) => warn!(plugin = %name, error = %e, "skipping plugin"),
                }
            }
            for artifact in artifacts {
                let path = artifact.path.clone();
                match host.add(artifact.plugin, Some(artifact.path), Some(artifact.library)) {
                    Ok(id) => loaded.push(id),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping plugin artifact"),
                }
            }
        }

        for plugin_id in loaded {
            self.inner.init_plugin(plugin_id).await;
        }
    }

    async fn start_monitoring_auto_devices(&self) {
        let handles: Vec<_> = {
            let host = self.inner.host.read().await;
            host.plugins()
                .iter()
                .map(|p| p.handle())
                .collect()
        };
        for handle in handles {
            handle.write().await.start_monitoring_auto_devices().await;
        }
    }

    // Catalog queries.

    /// Metadata of all loaded plugins, in load order.
    pub async fn plugins(&self) -> Vec<PluginMetadata> {
        let host = self.inner.host.read().await;
        host.plugins().iter().map(|p| p.metadata().clone()).collect()
    }

    pub async fn plugin(&self, id: PluginId) -> Option<PluginMetadata> {
        let host = self.inner.host.read().await;
        host.plugin(id).map(|p| p.metadata().clone())
    }

    pub async fn supported_vendors(&self) -> Vec<Vendor> {
        self.inner.host.read().await.supported_vendors()
    }

    /// All supported device classes, optionally filtered by vendor.
    pub async fn supported_devices(&self, vendor_id: Option<VendorId>) -> Vec<DeviceClass> {
        self.inner.host.read().await.supported_devices(vendor_id)
    }

    pub async fn find_device_class(&self, id: DeviceClassId) -> Option<DeviceClass> {
        self.inner.host.read().await.find_device_class(id)
    }

    // Configured device queries.

    pub async fn configured_devices(&self) -> Vec<Device> {
        self.inner.registry.all().await
    }

    pub async fn find_configured_device(&self, id: DeviceId) -> Option<Device> {
        self.inner.registry.get(id).await
    }

    /// All configured devices of one class.
    pub async fn find_configured_devices(&self, device_class_id: DeviceClassId) -> Vec<Device> {
        self.inner.registry.by_class(device_class_id).await
    }

    /// Validate and apply a new plugin configuration, persisting it once the
    /// plugin accepted it. Re-applying the stored configuration is a no-op.
    pub async fn set_plugin_config(
        &self,
        plugin_id: PluginId,
        params: ParamList,
    ) -> DeviceResult<()> {
        let plugin = self
            .inner
            .plugin_handle(plugin_id)
            .await
            .ok_or(DeviceError::PluginNotFound(plugin_id))?;
        plugin.write().await.set_configuration(&params).await?;

        match self.inner.store.load_plugin_config(plugin_id) {
            Ok(Some(stored)) if stored == params => return Ok(()),
            Ok(_) => {}
            Err(e) => warn!(plugin = %plugin_id, error = %e, "failed to read stored plugin config"),
        }
        if let Err(e) = self.inner.store.store_plugin_config(plugin_id, &params) {
            warn!(plugin = %plugin_id, error = %e, "failed to persist plugin config");
        }
        Ok(())
    }

    /// Start a discovery for the given class. Returns [`Outcome::Async`]
    /// when the plugin reports results later; either way each completed
    /// discovery produces one `DevicesDiscovered` batch.
    pub async fn discover_devices(
        &self,
        device_class_id: DeviceClassId,
        params: ParamList,
    ) -> DeviceResult<Outcome> {
        let class = self
            .find_device_class(device_class_id)
            .await
            .ok_or(DeviceError::DeviceClassNotFound(device_class_id))?;
        if !class.create_methods.contains(CreateMethods::DISCOVERY) {
            return Err(DeviceError::CreationMethodNotSupported);
        }
        let effective = verify_params(&class.discovery_param_types, &params, false)?;
        let plugin = self
            .inner
            .plugin_handle(class.plugin_id)
            .await
            .ok_or(DeviceError::PluginNotFound(class.plugin_id))?;

        // Starting a fresh discovery (none in flight for this class) evicts
        // the class's stale descriptors from the pool.
        {
            let in_flight = self.inner.discoveries_in_flight.read().await;
            if in_flight.get(&class.id).copied().unwrap_or(0) == 0 {
                drop(in_flight);
                self.inner
                    .discovered
                    .write()
                    .await
                    .retain(|_, d| d.device_class_id != class.id);
            }
        }

        // Record interest before calling in, so a completion posted from
        // inside the plugin cannot outrun the bookkeeping.
        self.inner
            .discovering_plugins
            .write()
            .await
            .push(class.plugin_id);
        *self
            .inner
            .discoveries_in_flight
            .write()
            .await
            .entry(class.id)
            .or_insert(0) += 1;

        let response = plugin
            .write()
            .await
            .discover_devices(class.id, &effective)
            .await;
        match response {
            Ok(DiscoveryResponse::Async) => Ok(Outcome::Async),
            Ok(DiscoveryResponse::Finished(descriptors)) => {
                self.inner.discovery_completed(class.plugin_id, class.id).await;
                self.inner.absorb_descriptors(class.id, descriptors).await;
                Ok(Outcome::Done)
            }
            Err(e) => {
                self.inner.discovery_completed(class.plugin_id, class.id).await;
                Err(e)
            }
        }
    }

    /// Add a configured device with caller-supplied parameters
    /// (`CreateMethodUser`; the class's setup method must be `JustAdd`).
    /// Omitting `device_id` generates a fresh one.
    pub async fn add_configured_device(
        &self,
        device_class_id: DeviceClassId,
        params: ParamList,
        device_id: Option<DeviceId>,
    ) -> DeviceResult<Outcome> {
        let class = self
            .find_device_class(device_class_id)
            .await
            .ok_or(DeviceError::DeviceClassNotFound(device_class_id))?;
        if !class.create_methods.contains(CreateMethods::USER) {
            return Err(DeviceError::CreationMethodNotSupported);
        }
        self.inner
            .add_internal(&class, params, device_id.unwrap_or_default())
            .await
    }

    /// Add a configured device from a previously discovered descriptor.
    /// The descriptor is consumed.
    pub async fn add_configured_device_from_descriptor(
        &self,
        device_class_id: DeviceClassId,
        descriptor_id: DeviceDescriptorId,
        device_id: Option<DeviceId>,
    ) -> DeviceResult<Outcome> {
        let class = self
            .find_device_class(device_class_id)
            .await
            .ok_or(DeviceError::DeviceClassNotFound(device_class_id))?;
        if !class.create_methods.contains(CreateMethods::DISCOVERY) {
            return Err(DeviceError::CreationMethodNotSupported);
        }
        let descriptor = self
            .inner
            .discovered
            .write()
            .await
            .remove(&descriptor_id)
            .ok_or(DeviceError::DeviceDescriptorNotFound(descriptor_id))?;
        self.inner
            .add_internal(&class, descriptor.params, device_id.unwrap_or_default())
            .await
    }

    /// Record a pairing transaction bound to caller-supplied parameters.
    pub async fn pair_device(
        &self,
        transaction_id: PairingTransactionId,
        device_class_id: DeviceClassId,
        params: ParamList,
    ) -> DeviceResult<Outcome> {
        let class = self
            .find_device_class(device_class_id)
            .await
            .ok_or(DeviceError::DeviceClassNotFound(device_class_id))?;
        if class.setup_method == SetupMethod::JustAdd {
            debug!(class = %class.name, "no need to pair this device");
            return Err(DeviceError::SetupMethodNotSupported);
        }
        let effective = verify_params(&class.param_types, &params, true)?;
        self.inner
            .record_pairing(
                transaction_id,
                PairingTransaction {
                    device_class_id,
                    payload: PairingPayload::Params(effective),
                },
            )
            .await;
        Ok(Outcome::Done)
    }

    /// Record a pairing transaction bound to a discovered descriptor. The
    /// descriptor stays pooled until the transaction finishes.
    pub async fn pair_device_with_descriptor(
        &self,
        transaction_id: PairingTransactionId,
        device_class_id: DeviceClassId,
        descriptor_id: DeviceDescriptorId,
    ) -> DeviceResult<Outcome> {
        let class = self
            .find_device_class(device_class_id)
            .await
            .ok_or(DeviceError::DeviceClassNotFound(device_class_id))?;
        if class.setup_method == SetupMethod::JustAdd {
            debug!(class = %class.name, "no need to pair this device");
            return Err(DeviceError::SetupMethodNotSupported);
        }
        if !self.inner.discovered.read().await.contains_key(&descriptor_id) {
            return Err(DeviceError::DeviceDescriptorNotFound(descriptor_id));
        }
        self.inner
            .record_pairing(
                transaction_id,
                PairingTransaction {
                    device_class_id,
                    payload: PairingPayload::Descriptor(descriptor_id),
                },
            )
            .await;
        Ok(Outcome::Done)
    }

    /// Confirm a pairing with the user-supplied secret. On success (sync or
    /// async) a `PairingFinished` notification carries the fresh device id
    /// and the device proceeds through setup.
    pub async fn confirm_pairing(
        &self,
        transaction_id: PairingTransactionId,
        secret: &str,
    ) -> DeviceResult<Outcome> {
        let (device_class_id, params) = {
            let pairings = self.inner.pending_pairings.read().await;
            let transaction = pairings
                .get(&transaction_id)
                .ok_or(DeviceError::PairingTransactionNotFound(transaction_id))?;
            let params = match &transaction.payload {
                PairingPayload::Params(params) => params.clone(),
                PairingPayload::Descriptor(descriptor_id) => self
                    .inner
                    .discovered
                    .read()
                    .await
                    .get(descriptor_id)
                    .ok_or(DeviceError::DeviceDescriptorNotFound(*descriptor_id))?
                    .params
                    .clone(),
            };
            (transaction.device_class_id, params)
        };

        let class = self
            .find_device_class(device_class_id)
            .await
            .ok_or(DeviceError::DeviceClassNotFound(device_class_id))?;
        let plugin = self
            .inner
            .plugin_handle(class.plugin_id)
            .await
            .ok_or(DeviceError::PluginNotFound(class.plugin_id))?;

        let status = plugin
            .write()
            .await
            .confirm_pairing(transaction_id, device_class_id, &params, secret)
            .await;
        match status {
            SetupStatus::Async => Ok(Outcome::Async),
            SetupStatus::Success => {
                self.inner
                    .finish_pairing(transaction_id, SetupStatus::Success)
                    .await;
                Ok(Outcome::Done)
            }
            SetupStatus::Failure => {
                self.inner
                    .finish_pairing(transaction_id, SetupStatus::Failure)
                    .await;
                Err(DeviceError::SetupFailed)
            }
        }
    }

    /// Validate and dispatch an action to the owning plugin.
    pub async fn execute_action(&self, action: &Action) -> DeviceResult<Outcome> {
        let device = self
            .inner
            .registry
            .get(action.device_id)
            .await
            .ok_or(DeviceError::DeviceNotFound(action.device_id))?;
        let class = self
            .find_device_class(device.device_class_id())
            .await
            .ok_or(DeviceError::DeviceClassNotFound(device.device_class_id()))?;
        let action_type = class
            .action_type(action.action_type_id)
            .ok_or(DeviceError::ActionTypeNotFound(action.action_type_id))?;
        let effective = verify_params(&action_type.param_types, &action.params, true)?;
        let final_action = Action {
            id: action.id,
            action_type_id: action.action_type_id,
            device_id: action.device_id,
            params: effective,
        };

        let plugin = self
            .inner
            .plugin_handle(device.plugin_id())
            .await
            .ok_or(DeviceError::PluginNotFound(device.plugin_id()))?;

        self.inner.pending_actions.write().await.insert(action.id);
        let result = plugin
            .write()
            .await
            .execute_action(&device, &final_action)
            .await;
        match result {
            Ok(Outcome::Async) => Ok(Outcome::Async),
            Ok(Outcome::Done) => {
                self.inner.pending_actions.write().await.remove(&action.id);
                Ok(Outcome::Done)
            }
            Err(e) => {
                self.inner.pending_actions.write().await.remove(&action.id);
                Err(e)
            }
        }
    }

    /// Remove a configured device: notify the plugin, release its timer
    /// subscription and purge its persisted configuration. A still-pending
    /// async setup is discarded; its eventual completion is ignored.
    pub async fn remove_configured_device(&self, device_id: DeviceId) -> DeviceResult<()> {
        let device = self
            .inner
            .registry
            .remove(device_id)
            .await
            .ok_or(DeviceError::DeviceNotFound(device_id))?;
        self.inner.pending_setups.write().await.remove(&device_id);

        if let Some(plugin) = self.inner.plugin_handle(device.plugin_id()).await {
            plugin.write().await.device_removed(&device).await;
        }
        self.inner.hardware.timer_unsubscribe(device_id);
        if let Err(e) = self.inner.store.remove_device(device_id) {
            warn!(device = %device_id, error = %e, "failed to purge persisted device config");
        }
        info!(device = %device_id, name = %device.name(), "removed configured device");
        Ok(())
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().expect("manager lock poisoned").take() {
            pump.abort();
        }
        self.inner.hardware.shutdown();
    }
}

impl Inner {
    async fn plugin_handle(&self, id: PluginId) -> Option<crate::plugin::DynDevicePlugin> {
        self.host.read().await.plugin_handle(id)
    }

    /// Initialise a freshly loaded plugin: hand it its context and apply
    /// its configuration, preferring the stored one, then defaults from its
    /// declaration, then empty. Loading never writes the configuration back.
    async fn init_plugin(&self, plugin_id: PluginId) {
        let Some(handle) = self.plugin_handle(plugin_id).await else {
            return;
        };
        let ctx = PluginContext::new(plugin_id, self.msg_tx.clone());
        let mut plugin = handle.write().await;
        plugin.init(ctx).await;

        let params = match self.store.load_plugin_config(plugin_id) {
            Ok(Some(stored)) => stored,
            Ok(None) => plugin
                .configuration_description()
                .iter()
                .filter_map(|t| {
                    t.default_value
                        .clone()
                        .map(|v| Param::new(t.name.clone(), v))
                })
                .collect(),
            Err(e) => {
                warn!(plugin = %plugin_id, error = %e, "failed to read stored plugin config");
                ParamList::new()
            }
        };
        if let Err(e) = plugin.set_configuration(&params).await {
            warn!(plugin = %plugin_id, error = %e, "error setting plugin configuration, broken configuration?");
        }
    }

    /// Load persisted devices and run each through setup. A device whose
    /// class no longer resolves stays registered but never becomes
    /// functional until its plugin is available again.
    async fn load_configured_devices(&self) {
        let stored = match self.store.load_devices() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "failed to load configured devices");
                return;
            }
        };
        info!(count = stored.len(), "loading configured devices");

        for record in stored {
            let mut device = Device::new(record.plugin_id, record.id, record.device_class_id);
            device.set_name(record.name);
            device.set_params(record.params);

            if let Err(e) = self.registry.insert(device.clone()).await {
                warn!(device = %record.id, error = %e, "skipping stored device");
                continue;
            }

            let class = self.host.read().await.find_device_class(record.device_class_id);
            let Some(class) = class else {
                warn!(
                    device = %record.id,
                    class = %record.device_class_id,
                    "device class not found; device stays unconfigured until its plugin is back"
                );
                continue;
            };
            let _ = self.setup_device(device, &class, SetupOrigin::Restore).await;
        }
    }

    async fn add_internal(
        &self,
        class: &DeviceClass,
        params: ParamList,
        device_id: DeviceId,
    ) -> DeviceResult<Outcome> {
        if class.setup_method != SetupMethod::JustAdd {
            return Err(DeviceError::SetupMethodNotSupported);
        }
        let effective = verify_params(&class.param_types, &params, true)?;

        if self.registry.contains(device_id).await
            || self.pending_setups.read().await.contains_key(&device_id)
        {
            return Err(DeviceError::DuplicateUuid(device_id));
        }

        let mut device = Device::new(class.plugin_id, device_id, class.id);
        device.set_name(class.name.clone());
        device.set_params(effective);
        self.setup_device(device, class, SetupOrigin::New).await
    }

    /// Run plugin setup for a device. The continuation is parked before the
    /// call so a completion posted from inside `setup_device` cannot race it.
    async fn setup_device(
        &self,
        mut device: Device,
        class: &DeviceClass,
        origin: SetupOrigin,
    ) -> DeviceResult<Outcome> {
        let states = class
            .state_types
            .iter()
            .map(|t| State::new(t.id, device.id(), t.default_value.clone()))
            .collect();
        device.set_states(states);

        let Some(plugin) = self.plugin_handle(class.plugin_id).await else {
            warn!(device = %device.id(), "no plugin for this device");
            return Err(DeviceError::PluginNotFound(class.plugin_id));
        };

        let device_id = device.id();
        self.pending_setups
            .write()
            .await
            .insert(device_id, PendingSetup { device: device.clone(), origin });

        let status = plugin.write().await.setup_device(&device).await;
        match status {
            SetupStatus::Async => Ok(Outcome::Async),
            SetupStatus::Success => {
                if let Some(pending) = self.pending_setups.write().await.remove(&device_id) {
                    self.finalize_setup(pending).await;
                }
                Ok(Outcome::Done)
            }
            SetupStatus::Failure => {
                if let Some(pending) = self.pending_setups.write().await.remove(&device_id) {
                    self.fail_setup(pending).await;
                }
                Err(DeviceError::SetupFailed)
            }
        }
    }

    /// Complete a successful setup: timer subscription, monotonic
    /// `setup_complete`, registry entry, persistence, notification.
    async fn finalize_setup(&self, pending: PendingSetup) {
        let PendingSetup { mut device, origin } = pending;

        {
            let host = self.host.read().await;
            if host.plugin_requires(device.plugin_id(), HardwareResources::TIMER) {
                self.hardware.timer_subscribe(device.id());
            }
            if let Some(class) = host.find_device_class(device.device_class_id()) {
                self.hardware.warn_if_unavailable(class.required_hardware);
            }
        }

        device.mark_setup_complete();
        self.registry.upsert(device.clone()).await;
        if origin == SetupOrigin::New {
            if let Err(e) = self.store.store_device(&device) {
                warn!(device = %device.id(), error = %e, "failed to persist device");
            }
        }

        debug!(device = %device.id(), name = %device.name(), "device setup complete");
        self.bus.publish(HubNotification::DeviceSetupFinished {
            device,
            status: Ok(()),
        });
    }

    /// Handle a failed setup. Restored devices stay registered (rules may
    /// reference them); fresh devices are discarded.
    async fn fail_setup(&self, pending: PendingSetup) {
        let PendingSetup { device, origin } = pending;
        match origin {
            SetupOrigin::Restore => {
                warn!(
                    device = %device.id(),
                    name = %device.name(),
                    "device setup failed; device will not be functional"
                );
            }
            SetupOrigin::New => {
                warn!(
                    device = %device.id(),
                    name = %device.name(),
                    "device setup failed; not adding device to the system"
                );
            }
        }
        self.bus.publish(HubNotification::DeviceSetupFinished {
            device,
            status: Err(DeviceError::SetupFailed),
        });
    }

    async fn record_pairing(
        &self,
        transaction_id: PairingTransactionId,
        transaction: PairingTransaction,
    ) {
        let mut pairings = self.pending_pairings.write().await;
        if pairings.insert(transaction_id, transaction).is_some() {
            warn!(transaction = %transaction_id, "replacing pairing transaction with the same id");
        }
    }

    /// Consume a pairing transaction. On success a fresh device id is
    /// issued, reported via `PairingFinished`, and the device goes through
    /// setup. The bound descriptor is consumed regardless of the outcome.
    async fn finish_pairing(&self, transaction_id: PairingTransactionId, status: SetupStatus) {
        if status == SetupStatus::Async {
            warn!(
                transaction = %transaction_id,
                "bad plugin implementation: pairing finished with status Async, ignoring"
            );
            return;
        }

        let Some(transaction) = self.pending_pairings.write().await.remove(&transaction_id)
        else {
            warn!(transaction = %transaction_id, "pairing finished without waiting for it, ignoring");
            return;
        };

        let params = match transaction.payload {
            PairingPayload::Params(params) => Some(params),
            PairingPayload::Descriptor(descriptor_id) => self
                .discovered
                .write()
                .await
                .remove(&descriptor_id)
                .map(|d| d.params),
        };

        if status == SetupStatus::Failure {
            self.bus.publish(HubNotification::PairingFinished {
                transaction_id,
                status: Err(DeviceError::SetupFailed),
            });
            return;
        }

        let Some(params) = params else {
            warn!(transaction = %transaction_id, "descriptor vanished during pairing");
            self.bus.publish(HubNotification::PairingFinished {
                transaction_id,
                status: Err(DeviceError::SetupFailed),
            });
            return;
        };
        let Some(class) = self
            .host
            .read()
            .await
            .find_device_class(transaction.device_class_id)
        else {
            self.bus.publish(HubNotification::PairingFinished {
                transaction_id,
                status: Err(DeviceError::DeviceClassNotFound(transaction.device_class_id)),
            });
            return;
        };
        if self.plugin_handle(class.plugin_id).await.is_none() {
            warn!(class = %class.name, "can't find a plugin for this device class");
            self.bus.publish(HubNotification::PairingFinished {
                transaction_id,
                status: Err(DeviceError::PluginNotFound(class.plugin_id)),
            });
            return;
        }

        // Pairing went fine: let consumers know and tell them which device
        // id the ongoing setup will use.
        let device_id = DeviceId::new();
        self.bus.publish(HubNotification::PairingFinished {
            transaction_id,
            status: Ok(device_id),
        });

        let mut device = Device::new(class.plugin_id, device_id, class.id);
        device.set_name(class.name.clone());
        device.set_params(params);
        let _ = self.setup_device(device, &class, SetupOrigin::New).await;
    }

    /// Bookkeeping shared by sync and async discovery completion.
    async fn discovery_completed(&self, plugin_id: PluginId, device_class_id: DeviceClassId) {
        let mut discovering = self.discovering_plugins.write().await;
        if let Some(pos) = discovering.iter().position(|p| *p == plugin_id) {
            discovering.remove(pos);
        }
        drop(discovering);

        let mut in_flight = self.discoveries_in_flight.write().await;
        match in_flight.get_mut(&device_class_id) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                in_flight.remove(&device_class_id);
            }
            None => {
                warn!(class = %device_class_id, "discovery results without a pending discovery");
            }
        }
    }

    /// Pool a batch of descriptors and publish it upward. Descriptor ids
    /// are globally unique; batches from concurrent discoveries accumulate.
    async fn absorb_descriptors(
        &self,
        device_class_id: DeviceClassId,
        descriptors: Vec<DeviceDescriptor>,
    ) {
        {
            let mut pool = self.discovered.write().await;
            for descriptor in &descriptors {
                pool.insert(descriptor.id, descriptor.clone());
            }
        }
        info!(
            class = %device_class_id,
            count = descriptors.len(),
            "devices discovered"
        );
        self.bus.publish(HubNotification::DevicesDiscovered {
            device_class_id,
            descriptors,
        });
    }

    async fn handle_message(&self, msg: HubMessage) {
        match msg {
            HubMessage::Plugin(plugin_id, notification) => {
                self.handle_plugin_notification(plugin_id, notification).await;
            }
            HubMessage::Hardware(event) => self.handle_hardware_event(event).await,
        }
    }

    async fn handle_plugin_notification(
        &self,
        plugin_id: PluginId,
        notification: PluginNotification,
    ) {
        match notification {
            PluginNotification::DevicesDiscovered {
                device_class_id,
                descriptors,
            } => {
                self.discovery_completed(plugin_id, device_class_id).await;
                self.absorb_descriptors(device_class_id, descriptors).await;
            }
            PluginNotification::DeviceSetupFinished { device_id, status } => {
                self.handle_setup_finished(device_id, status).await;
            }
            PluginNotification::PairingFinished {
                transaction_id,
                status,
            } => {
                self.finish_pairing(transaction_id, status).await;
            }
            PluginNotification::ActionExecutionFinished { action_id, status } => {
                self.handle_action_finished(action_id, status).await;
            }
            PluginNotification::AutoDevicesAppeared {
                device_class_id,
                descriptors,
            } => {
                self.handle_auto_devices(plugin_id, device_class_id, descriptors)
                    .await;
            }
            PluginNotification::StateChanged {
                device_id,
                state_type_id,
                value,
            } => {
                self.handle_state_changed(device_id, state_type_id, value).await;
            }
            PluginNotification::EventEmitted { event } => {
                // Custom plugin events are forwarded verbatim.
                self.bus.publish(HubNotification::EventTriggered { event });
            }
        }
    }

    async fn handle_setup_finished(&self, device_id: DeviceId, status: SetupStatus) {
        if status == SetupStatus::Async {
            warn!(
                device = %device_id,
                "bad plugin implementation: setup finished with status Async, ignoring"
            );
            return;
        }

        let Some(pending) = self.pending_setups.write().await.remove(&device_id) else {
            match self.registry.get(device_id).await {
                Some(device) if device.setup_complete() => {
                    warn!(device = %device_id, "device has been set up before, ignoring");
                }
                _ => {
                    warn!(device = %device_id, "setup finished for an unknown device, ignoring");
                }
            }
            return;
        };

        match status {
            SetupStatus::Success => self.finalize_setup(pending).await,
            SetupStatus::Failure => self.fail_setup(pending).await,
            SetupStatus::Async => unreachable!("checked above"),
        }
    }

    async fn handle_action_finished(
        &self,
        action_id: ActionId,
        status: Result<(), DeviceError>,
    ) {
        if !self.pending_actions.write().await.remove(&action_id) {
            warn!(action = %action_id, "action finished without waiting for it, ignoring");
            return;
        }
        self.bus.publish(HubNotification::ActionExecutionFinished { action_id, status });
    }

    /// Devices the plugin created on its own: each descriptor becomes a
    /// device and runs through the usual setup; successful ones persist.
    async fn handle_auto_devices(
        &self,
        plugin_id: PluginId,
        device_class_id: DeviceClassId,
        descriptors: Vec<DeviceDescriptor>,
    ) {
        let Some(class) = self.host.read().await.find_device_class(device_class_id) else {
            warn!(class = %device_class_id, "auto devices for an unknown device class, ignoring");
            return;
        };
        if class.plugin_id != plugin_id {
            warn!(
                class = %class.name,
                "auto devices reported by a foreign plugin, ignoring"
            );
            return;
        }
        if !class.create_methods.contains(CreateMethods::AUTO) {
            warn!(class = %class.name, "device class does not support auto devices, ignoring");
            return;
        }

        for descriptor in descriptors {
            let mut device = Device::new(class.plugin_id, DeviceId::new(), class.id);
            device.set_name(class.name.clone());
            device.set_params(descriptor.params);
            let _ = self.setup_device(device, &class, SetupOrigin::New).await;
        }
    }

    /// A state mutation yields the `DeviceStateChanged` notification
    /// followed by the synthetic state-derived event, in that order.
    async fn handle_state_changed(
        &self,
        device_id: DeviceId,
        state_type_id: StateTypeId,
        value: ParamValue,
    ) {
        let Some(device) = self.registry.get(device_id).await else {
            warn!(device = %device_id, "state change for an unknown device, ignoring");
            return;
        };
        if !device.setup_complete() {
            warn!(device = %device_id, "state change before setup completed, ignoring");
            return;
        }

        match self
            .registry
            .set_state_value(device_id, state_type_id, value.clone())
            .await
        {
            Ok(updated) => {
                self.bus.publish(HubNotification::DeviceStateChanged {
                    device: updated,
                    state_type_id,
                    value: value.clone(),
                });
                self.bus.publish(HubNotification::EventTriggered {
                    event: Event::from_state_change(state_type_id.into(), device_id, value),
                });
            }
            Err(e) => {
                warn!(device = %device_id, error = %e, "dropping state change");
            }
        }
    }

    async fn handle_hardware_event(&self, event: HardwareEvent) {
        match event {
            HardwareEvent::RadioFrame { band, pulses } => {
                self.handle_radio_frame(band, pulses).await;
            }
            HardwareEvent::TimerTick => self.handle_timer_tick().await,
            HardwareEvent::UpnpDiscoveryFinished {
                plugin_id,
                descriptors,
            } => {
                self.handle_upnp_discovery_finished(plugin_id, descriptors).await;
            }
            HardwareEvent::UpnpNotify { payload } => self.handle_upnp_notify(payload).await,
        }
    }

    /// Fan a raw radio frame out to every interested plugin: those owning a
    /// configured device whose class requires the band, plus those with an
    /// active discovery requiring it. Deduplicated, in plugin-load order.
    async fn handle_radio_frame(&self, band: RadioBand, pulses: Vec<i32>) {
        let resource = band.resource();
        let devices = self.registry.all().await;
        let discovering = self.discovering_plugins.read().await.clone();

        let targets: Vec<_> = {
            let host = self.host.read().await;
            host.plugins()
                .iter()
                .filter(|loaded| {
                    let plugin_id = loaded.plugin_id();
                    let owns_interested_device = devices.iter().any(|device| {
                        device.plugin_id() == plugin_id
                            && host
                                .find_device_class(device.device_class_id())
                                .map(|class| class.required_hardware.intersects(resource))
                                .unwrap_or(false)
                    });
                    owns_interested_device
                        || (discovering.contains(&plugin_id)
                            && loaded.required_hardware().intersects(resource))
                })
                .map(|loaded| loaded.handle())
                .collect()
        };

        for plugin in targets {
            plugin.write().await.radio_data(band, &pulses).await;
        }
    }

    /// Broadcast the global tick to all timer-using plugins, in load order.
    async fn handle_timer_tick(&self) {
        let targets = {
            self.host
                .read()
                .await
                .plugins_requiring(HardwareResources::TIMER)
        };
        for (_, plugin) in targets {
            plugin.write().await.on_timer().await;
        }
    }

    /// UPnP discovery results are routed only to the requesting plugin.
    async fn handle_upnp_discovery_finished(
        &self,
        plugin_id: PluginId,
        descriptors: Vec<UpnpDeviceDescriptor>,
    ) {
        let handle = {
            let host = self.host.read().await;
            if host.plugin_requires(plugin_id, HardwareResources::UPNP_DISCOVERY) {
                host.plugin_handle(plugin_id)
            } else {
                None
            }
        };
        if let Some(plugin) = handle {
            plugin.write().await.upnp_discovery_finished(&descriptors).await;
        }
    }

    /// Unsolicited UPnP notifications go to every plugin requiring UPnP.
    async fn handle_upnp_notify(&self, payload: Vec<u8>) {
        let targets = {
            self.host
                .read()
                .await
                .plugins_requiring(HardwareResources::UPNP_DISCOVERY)
        };
        for (_, plugin) in targets {
            plugin.write().await.upnp_notify_received(&payload).await;
        }
    }
}
