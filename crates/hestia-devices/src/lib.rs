//! Device and plugin orchestrator for the Hestia automation hub.
//!
//! This crate is the hub's core: it owns the device type catalog, drives
//! device discovery, pairing and setup lifecycles, multiplexes shared
//! hardware resources (433/868 MHz radios, the global timer, UPnP
//! discovery) across driver plugins, validates structured parameters
//! against schemas, dispatches actions and fans out state changes and
//! events.
//!
//! ## Architecture
//!
//! - [`DeviceManager`]: the single entry point composing everything below.
//! - [`PluginHost`](host::PluginHost): loads driver plugins and holds the
//!   vendor / device-class catalogs.
//! - [`HardwareBus`](hardware::HardwareBus): shares radios, the global
//!   timer and UPnP discovery across plugins.
//! - [`DeviceRegistry`](registry::DeviceRegistry): owns all configured
//!   devices.
//! - [`NotificationBus`](notifications::NotificationBus): fans
//!   notifications out to outer servers and the rules engine.
//!
//! Plugins implement [`DevicePlugin`] and talk back through their
//! [`PluginContext`]; every capability has a no-op default, so a driver
//! implements only what its hardware does.

pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod hardware;
pub mod host;
pub mod ids;
pub mod manager;
pub mod notifications;
pub mod params;
pub mod persistence;
pub mod plugin;
pub mod registry;
pub mod types;
pub mod validator;

pub use config::HubConfig;
pub use device::{Device, State};
pub use error::{DeviceError, DeviceResult, Outcome, SetupStatus};
pub use event::{Action, Event};
pub use hardware::{HardwareBus, HardwareResources, RadioBand, UpnpDeviceDescriptor, TIMER_INTERVAL};
pub use host::{NativePluginLoader, PluginHost, PluginLoadError, PLUGIN_ABI_VERSION};
pub use ids::{
    ActionId, ActionTypeId, DeviceClassId, DeviceDescriptorId, DeviceId, EventTypeId,
    PairingTransactionId, ParamTypeId, PluginId, StateTypeId, VendorId,
};
pub use manager::DeviceManager;
pub use notifications::{HubNotification, NotificationBus, NotificationReceiver};
pub use params::{Color, Param, ParamKind, ParamList, ParamValue};
pub use persistence::{DeviceConfigStore, StoredDevice};
pub use plugin::{
    DevicePlugin, DiscoveryResponse, DynDevicePlugin, PluginContext, PluginMetadata,
    PluginNotification,
};
pub use registry::DeviceRegistry;
pub use types::{
    ActionType, CreateMethods, DeviceClass, DeviceDescriptor, EventType, ParamType, SetupMethod,
    StateType, Vendor,
};
pub use validator::verify_params;
