//! Shared test fixtures: a scriptable mock plugin and notification helpers.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use hestia_devices::{
    Action, ActionId, ActionType, ActionTypeId, CreateMethods, Device, DeviceClass, DeviceClassId,
    DeviceError, DeviceId, DevicePlugin, DeviceResult, DiscoveryResponse, HardwareResources,
    HubNotification, NotificationReceiver, Outcome, PairingTransactionId, ParamKind, ParamList,
    ParamType, PluginContext, PluginId, PluginMetadata, RadioBand, SetupMethod, SetupStatus,
    StateType, StateTypeId, Vendor, VendorId,
};

/// One recorded call into the mock plugin.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Init,
    SetConfiguration(ParamList),
    SetupDevice(DeviceId),
    DeviceRemoved(DeviceId),
    DiscoverDevices(DeviceClassId),
    ConfirmPairing(PairingTransactionId, String),
    ExecuteAction(ActionId),
    StartMonitoring,
    RadioData(RadioBand, Vec<i32>),
    TimerTick,
    UpnpNotify(Vec<u8>),
    UpnpDiscoveryFinished(usize),
}

/// What the mock's discovery capability should do.
#[derive(Debug, Clone)]
pub enum MockDiscovery {
    Unsupported,
    Sync(Vec<hestia_devices::DeviceDescriptor>),
    Async,
}

/// Scriptable behavior shared between a test and its mock plugin.
pub struct MockBehavior {
    ctx: Mutex<Option<PluginContext>>,
    pub setup_response: Mutex<SetupStatus>,
    pub discovery: Mutex<MockDiscovery>,
    /// Secret accepted by `confirm_pairing`. `None` rejects everything.
    pub pairing_secret: Mutex<Option<String>>,
    /// When set, `confirm_pairing` returns `Async` instead of deciding.
    pub pairing_async: Mutex<bool>,
    pub action_response: Mutex<DeviceResult<Outcome>>,
    pub config_response: Mutex<DeviceResult<()>>,
    calls: Mutex<Vec<Call>>,
}

impl MockBehavior {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ctx: Mutex::new(None),
            setup_response: Mutex::new(SetupStatus::Success),
            discovery: Mutex::new(MockDiscovery::Unsupported),
            pairing_secret: Mutex::new(None),
            pairing_async: Mutex::new(false),
            action_response: Mutex::new(Ok(Outcome::Done)),
            config_response: Mutex::new(Ok(())),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// The context captured at init; panics when the plugin was never
    /// initialised.
    pub fn ctx(&self) -> PluginContext {
        self.ctx
            .lock()
            .unwrap()
            .clone()
            .expect("plugin was not initialised")
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| f(c)).count()
    }

    pub fn set_setup_response(&self, status: SetupStatus) {
        *self.setup_response.lock().unwrap() = status;
    }

    pub fn set_discovery(&self, discovery: MockDiscovery) {
        *self.discovery.lock().unwrap() = discovery;
    }

    pub fn set_pairing_secret(&self, secret: impl Into<String>) {
        *self.pairing_secret.lock().unwrap() = Some(secret.into());
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

/// A driver plugin whose behavior is scripted by the test.
pub struct MockPlugin {
    metadata: PluginMetadata,
    classes: Vec<DeviceClass>,
    required_hardware: HardwareResources,
    config_description: Vec<ParamType>,
    behavior: Arc<MockBehavior>,
}

impl MockPlugin {
    pub fn new(name: &str, behavior: Arc<MockBehavior>) -> Self {
        Self::with_ids(PluginId::new(), VendorId::new(), name, behavior)
    }

    /// Build with fixed ids so a "restarted" hub can load the same plugin.
    pub fn with_ids(
        plugin_id: PluginId,
        vendor_id: VendorId,
        name: &str,
        behavior: Arc<MockBehavior>,
    ) -> Self {
        Self {
            metadata: PluginMetadata::new(plugin_id, name)
                .with_vendor(Vendor::new(vendor_id, format!("{name} vendor"))),
            classes: Vec::new(),
            required_hardware: HardwareResources::empty(),
            config_description: Vec::new(),
            behavior,
        }
    }

    pub fn plugin_id(&self) -> PluginId {
        self.metadata.id
    }

    pub fn vendor_id(&self) -> VendorId {
        self.metadata.vendors[0].id
    }

    pub fn with_class(mut self, class: DeviceClass) -> Self {
        self.classes.push(class);
        self
    }

    pub fn with_required_hardware(mut self, hardware: HardwareResources) -> Self {
        self.required_hardware = hardware;
        self
    }

    pub fn with_config_description(mut self, description: Vec<ParamType>) -> Self {
        self.config_description = description;
        self
    }
}

#[async_trait]
impl DevicePlugin for MockPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn supported_devices(&self) -> Vec<DeviceClass> {
        self.classes.clone()
    }

    fn required_hardware(&self) -> HardwareResources {
        self.required_hardware
    }

    fn configuration_description(&self) -> Vec<ParamType> {
        self.config_description.clone()
    }

    async fn init(&mut self, ctx: PluginContext) {
        *self.behavior.ctx.lock().unwrap() = Some(ctx);
        self.behavior.record(Call::Init);
    }

    async fn set_configuration(&mut self, params: &ParamList) -> DeviceResult<()> {
        self.behavior.record(Call::SetConfiguration(params.clone()));
        hestia_devices::verify_params(&self.config_description, params, false)?;
        self.behavior.config_response.lock().unwrap().clone()
    }

    async fn setup_device(&mut self, device: &Device) -> SetupStatus {
        self.behavior.record(Call::SetupDevice(device.id()));
        *self.behavior.setup_response.lock().unwrap()
    }

    async fn device_removed(&mut self, device: &Device) {
        self.behavior.record(Call::DeviceRemoved(device.id()));
    }

    async fn discover_devices(
        &mut self,
        device_class_id: DeviceClassId,
        _params: &ParamList,
    ) -> DeviceResult<DiscoveryResponse> {
        self.behavior.record(Call::DiscoverDevices(device_class_id));
        match self.behavior.discovery.lock().unwrap().clone() {
            MockDiscovery::Unsupported => Err(DeviceError::CreationMethodNotSupported),
            MockDiscovery::Sync(descriptors) => Ok(DiscoveryResponse::Finished(descriptors)),
            MockDiscovery::Async => Ok(DiscoveryResponse::Async),
        }
    }

    async fn confirm_pairing(
        &mut self,
        transaction_id: PairingTransactionId,
        _device_class_id: DeviceClassId,
        _params: &ParamList,
        secret: &str,
    ) -> SetupStatus {
        self.behavior
            .record(Call::ConfirmPairing(transaction_id, secret.to_string()));
        if *self.behavior.pairing_async.lock().unwrap() {
            return SetupStatus::Async;
        }
        match self.behavior.pairing_secret.lock().unwrap().as_deref() {
            Some(expected) if expected == secret => SetupStatus::Success,
            _ => SetupStatus::Failure,
        }
    }

    async fn execute_action(&mut self, _device: &Device, action: &Action) -> DeviceResult<Outcome> {
        self.behavior.record(Call::ExecuteAction(action.id));
        self.behavior.action_response.lock().unwrap().clone()
    }

    async fn start_monitoring_auto_devices(&mut self) {
        self.behavior.record(Call::StartMonitoring);
    }

    async fn radio_data(&mut self, band: RadioBand, pulses: &[i32]) {
        self.behavior.record(Call::RadioData(band, pulses.to_vec()));
    }

    async fn on_timer(&mut self) {
        self.behavior.record(Call::TimerTick);
    }

    async fn upnp_discovery_finished(
        &mut self,
        descriptors: &[hestia_devices::UpnpDeviceDescriptor],
    ) {
        self.behavior
            .record(Call::UpnpDiscoveryFinished(descriptors.len()));
    }

    async fn upnp_notify_received(&mut self, payload: &[u8]) {
        self.behavior.record(Call::UpnpNotify(payload.to_vec()));
    }
}

/// A discovery+JustAdd class with one bounded Int parameter `n` (0..10,
/// default 3), a Bool state `power` and a `toggle` action.
pub struct DemoClass {
    pub class: DeviceClass,
    pub power_state: StateTypeId,
    pub toggle_action: ActionTypeId,
}

pub fn demo_class(plugin_id: PluginId, vendor_id: VendorId) -> DemoClass {
    demo_class_with_id(DeviceClassId::new(), plugin_id, vendor_id)
}

pub fn demo_class_with_id(
    class_id: DeviceClassId,
    plugin_id: PluginId,
    vendor_id: VendorId,
) -> DemoClass {
    let power_state = StateTypeId::new();
    let toggle_action = ActionTypeId::new();
    let class = DeviceClass::new(class_id, plugin_id, vendor_id, "Demo Switch")
        .with_create_methods(CreateMethods::USER | CreateMethods::DISCOVERY)
        .with_setup_method(SetupMethod::JustAdd)
        .with_param_types(vec![ParamType::new("n", ParamKind::Int)
            .with_min(0i64)
            .with_max(10i64)
            .with_default_value(3i64)])
        .with_state_types(vec![StateType::new(power_state, "power", ParamKind::Bool)])
        .with_action_types(vec![
            ActionType::new(toggle_action, "toggle").with_param_types(Vec::new())
        ]);
    DemoClass {
        class,
        power_state,
        toggle_action,
    }
}

/// A discovery class that pairs via push button.
pub fn pairing_class(plugin_id: PluginId, vendor_id: VendorId) -> DeviceClass {
    DeviceClass::new(DeviceClassId::new(), plugin_id, vendor_id, "Paired Socket")
        .with_create_methods(CreateMethods::DISCOVERY)
        .with_setup_method(SetupMethod::PushButton)
}

/// Wait until the bus delivers a notification of the given kind, skipping
/// everything else.
pub async fn expect_notification(
    rx: &mut NotificationReceiver,
    kind: &str,
) -> HubNotification {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let notification = rx.recv().await.expect("notification bus closed");
            if notification.kind() == kind {
                return notification;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
}

/// Poll until `condition` holds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
