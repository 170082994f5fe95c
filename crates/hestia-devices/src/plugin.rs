//! The driver plugin interface.
//!
//! A plugin is modeled by its capability set: every method of
//! [`DevicePlugin`] has a default no-op (or not-supported) implementation,
//! so a driver only implements what its hardware actually does.
//!
//! Plugins never own devices. They receive a borrowed [`Device`] scoped to a
//! single call and correlate later callbacks by remembering the `DeviceId`.
//! Asynchronous completions are posted through the [`PluginContext`] handed
//! to [`DevicePlugin::init`]; each completion consumes exactly one pending
//! continuation inside the orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::device::Device;
use crate::error::{DeviceError, DeviceResult, Outcome, SetupStatus};
use crate::event::{Action, Event};
use crate::hardware::{HardwareResources, RadioBand, UpnpDeviceDescriptor};
use crate::ids::{
    ActionId, DeviceClassId, DeviceId, PairingTransactionId, PluginId, StateTypeId,
};
use crate::manager::HubMessage;
use crate::params::{ParamList, ParamValue};
use crate::types::{DeviceClass, DeviceDescriptor, ParamType, Vendor};
use crate::validator::verify_params;

/// Metadata a plugin artifact must expose. `name`, `id` and `vendors` are
/// required; artifacts with incomplete metadata are skipped with a warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub id: PluginId,
    pub name: String,
    pub vendors: Vec<Vendor>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

impl PluginMetadata {
    pub fn new(id: PluginId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            vendors: Vec::new(),
            description: None,
            author: None,
        }
    }

    pub fn with_vendor(mut self, vendor: Vendor) -> Self {
        self.vendors.push(vendor);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// What a plugin returns from a discovery request.
#[derive(Debug, Clone)]
pub enum DiscoveryResponse {
    /// Discovery completed synchronously with this batch of descriptors.
    Finished(Vec<DeviceDescriptor>),
    /// Results will arrive later through
    /// [`PluginContext::devices_discovered`].
    Async,
}

/// A completion or spontaneous notification posted by a plugin.
#[derive(Debug, Clone)]
pub enum PluginNotification {
    DevicesDiscovered {
        device_class_id: DeviceClassId,
        descriptors: Vec<DeviceDescriptor>,
    },
    DeviceSetupFinished {
        device_id: DeviceId,
        status: SetupStatus,
    },
    PairingFinished {
        transaction_id: PairingTransactionId,
        status: SetupStatus,
    },
    ActionExecutionFinished {
        action_id: ActionId,
        status: Result<(), DeviceError>,
    },
    AutoDevicesAppeared {
        device_class_id: DeviceClassId,
        descriptors: Vec<DeviceDescriptor>,
    },
    StateChanged {
        device_id: DeviceId,
        state_type_id: StateTypeId,
        value: ParamValue,
    },
    EventEmitted {
        event: Event,
    },
}

/// Handle a plugin uses to post notifications back onto the orchestrator's
/// queue. Cheap to clone; safe to move into background tasks.
#[derive(Clone)]
pub struct PluginContext {
    plugin_id: PluginId,
    tx: mpsc::UnboundedSender<HubMessage>,
}

impl PluginContext {
    pub(crate) fn new(plugin_id: PluginId, tx: mpsc::UnboundedSender<HubMessage>) -> Self {
        Self { plugin_id, tx }
    }

    pub fn plugin_id(&self) -> PluginId {
        self.plugin_id
    }

    /// Report the results of an asynchronous discovery as one batch.
    pub fn devices_discovered(
        &self,
        device_class_id: DeviceClassId,
        descriptors: Vec<DeviceDescriptor>,
    ) {
        self.post(PluginNotification::DevicesDiscovered {
            device_class_id,
            descriptors,
        });
    }

    /// Report completion of an asynchronous device setup. `status` must not
    /// be [`SetupStatus::Async`].
    pub fn device_setup_finished(&self, device_id: DeviceId, status: SetupStatus) {
        self.post(PluginNotification::DeviceSetupFinished { device_id, status });
    }

    /// Report completion of an asynchronous pairing confirmation.
    pub fn pairing_finished(&self, transaction_id: PairingTransactionId, status: SetupStatus) {
        self.post(PluginNotification::PairingFinished {
            transaction_id,
            status,
        });
    }

    /// Report completion of an asynchronous action execution.
    pub fn action_execution_finished(
        &self,
        action_id: ActionId,
        status: Result<(), DeviceError>,
    ) {
        self.post(PluginNotification::ActionExecutionFinished { action_id, status });
    }

    /// Announce devices that appeared on their own (CreateMethodAuto).
    pub fn auto_devices_appeared(
        &self,
        device_class_id: DeviceClassId,
        descriptors: Vec<DeviceDescriptor>,
    ) {
        self.post(PluginNotification::AutoDevicesAppeared {
            device_class_id,
            descriptors,
        });
    }

    /// Update one state of a device. The orchestrator emits the
    /// `DeviceStateChanged` notification and the synthetic event.
    pub fn set_state(&self, device_id: DeviceId, state_type_id: StateTypeId, value: ParamValue) {
        self.post(PluginNotification::StateChanged {
            device_id,
            state_type_id,
            value,
        });
    }

    /// Emit a custom event. Forwarded to subscribers verbatim.
    pub fn emit_event(&self, event: Event) {
        self.post(PluginNotification::EventEmitted { event });
    }

    fn post(&self, notification: PluginNotification) {
        if self
            .tx
            .send(HubMessage::Plugin(self.plugin_id, notification))
            .is_err()
        {
            debug!(plugin_id = %self.plugin_id, "orchestrator queue closed; dropping plugin notification");
        }
    }
}

/// A driver plugin.
///
/// Implementations are stateful; the orchestrator serialises calls into a
/// plugin through a write lock. Long-running work must not block these
/// methods: return [`SetupStatus::Async`] / [`Outcome::Async`] and post the
/// completion through the [`PluginContext`].
#[async_trait]
pub trait DevicePlugin: Send + Sync {
    /// The plugin's metadata. `name`, `id` and `vendors` are required.
    fn metadata(&self) -> &PluginMetadata;

    /// The device classes this plugin drives. Classes referencing a vendor
    /// unknown to the catalog are rejected at load time.
    fn supported_devices(&self) -> Vec<DeviceClass>;

    /// Hardware this plugin needs beyond what its device classes declare
    /// (e.g. a radio used during discovery before any device exists).
    fn required_hardware(&self) -> HardwareResources {
        HardwareResources::empty()
    }

    /// Schema of the plugin's own configuration.
    fn configuration_description(&self) -> Vec<ParamType> {
        Vec::new()
    }

    /// Called once after the plugin is loaded, before any other call.
    async fn init(&mut self, _ctx: PluginContext) {}

    /// Apply a new plugin configuration. The default validates against
    /// [`configuration_description`](Self::configuration_description).
    async fn set_configuration(&mut self, params: &ParamList) -> DeviceResult<()> {
        verify_params(&self.configuration_description(), params, false)?;
        Ok(())
    }

    /// Set up a freshly created or restored device.
    async fn setup_device(&mut self, _device: &Device) -> SetupStatus {
        SetupStatus::Success
    }

    /// A configured device was removed from the system.
    async fn device_removed(&mut self, _device: &Device) {}

    /// Start a discovery for the given class.
    async fn discover_devices(
        &mut self,
        _device_class_id: DeviceClassId,
        _params: &ParamList,
    ) -> DeviceResult<DiscoveryResponse> {
        Err(DeviceError::CreationMethodNotSupported)
    }

    /// Confirm a pairing transaction with the user-supplied secret.
    async fn confirm_pairing(
        &mut self,
        _transaction_id: PairingTransactionId,
        _device_class_id: DeviceClassId,
        _params: &ParamList,
        _secret: &str,
    ) -> SetupStatus {
        SetupStatus::Failure
    }

    /// Execute an action on a device.
    async fn execute_action(&mut self, _device: &Device, _action: &Action) -> DeviceResult<Outcome> {
        Ok(Outcome::Done)
    }

    /// Called once after load; plugins with auto devices report them through
    /// [`PluginContext::auto_devices_appeared`] from here on.
    async fn start_monitoring_auto_devices(&mut self) {}

    /// A raw radio frame arrived on a band this plugin is interested in.
    async fn radio_data(&mut self, _band: RadioBand, _pulses: &[i32]) {}

    /// The global timer ticked.
    async fn on_timer(&mut self) {}

    /// A UPnP discovery requested by this plugin finished.
    async fn upnp_discovery_finished(&mut self, _descriptors: &[UpnpDeviceDescriptor]) {}

    /// An unsolicited UPnP multicast notification arrived.
    async fn upnp_notify_received(&mut self, _payload: &[u8]) {}
}

/// Shared handle to a loaded plugin instance.
pub type DynDevicePlugin = Arc<tokio::sync::RwLock<Box<dyn DevicePlugin>>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::VendorId;
    use crate::params::ParamKind;

    struct BareMinimum {
        metadata: PluginMetadata,
    }

    #[async_trait]
    impl DevicePlugin for BareMinimum {
        fn metadata(&self) -> &PluginMetadata {
            &self.metadata
        }

        fn supported_devices(&self) -> Vec<DeviceClass> {
            Vec::new()
        }

        fn configuration_description(&self) -> Vec<ParamType> {
            vec![ParamType::new("interval", ParamKind::Uint).with_max(3600u64)]
        }
    }

    fn bare_plugin() -> BareMinimum {
        BareMinimum {
            metadata: PluginMetadata::new(PluginId::new(), "bare")
                .with_vendor(Vendor::new(VendorId::new(), "Acme")),
        }
    }

    #[tokio::test]
    async fn test_default_capabilities_are_noops() {
        let mut plugin = bare_plugin();
        let device = Device::new(PluginId::new(), DeviceId::new(), DeviceClassId::new());

        assert_eq!(plugin.setup_device(&device).await, SetupStatus::Success);
        assert!(matches!(
            plugin
                .discover_devices(DeviceClassId::new(), &ParamList::new())
                .await,
            Err(DeviceError::CreationMethodNotSupported)
        ));
        assert_eq!(
            plugin
                .confirm_pairing(
                    PairingTransactionId::new(),
                    DeviceClassId::new(),
                    &ParamList::new(),
                    "1234"
                )
                .await,
            SetupStatus::Failure
        );
    }

    #[tokio::test]
    async fn test_default_set_configuration_validates() {
        let mut plugin = bare_plugin();
        let ok = ParamList::new().with("interval", 60u64);
        assert!(plugin.set_configuration(&ok).await.is_ok());

        let too_big = ParamList::new().with("interval", 7200u64);
        assert!(plugin.set_configuration(&too_big).await.is_err());
    }
}
