//! Outward notifications and the bus that fans them out.
//!
//! Every observable effect of the orchestrator (discovery results, setup
//! completions, state changes, events, action completions, pairing results)
//! is published here. Outer servers and the rules engine subscribe through
//! [`NotificationBus::subscribe`].

use tokio::sync::broadcast;

use crate::device::Device;
use crate::error::DeviceError;
use crate::event::Event;
use crate::ids::{ActionId, DeviceClassId, DeviceId, PairingTransactionId, StateTypeId};
use crate::params::ParamValue;
use crate::types::DeviceDescriptor;

/// Default channel capacity for the notification bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A notification emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum HubNotification {
    /// Plugins and configured devices have been loaded. Fires exactly once.
    Loaded,

    /// A discovery for `device_class_id` completed with one batch of
    /// descriptors.
    DevicesDiscovered {
        device_class_id: DeviceClassId,
        descriptors: Vec<DeviceDescriptor>,
    },

    /// Setup of a device finished, successfully or not.
    DeviceSetupFinished {
        device: Device,
        status: Result<(), DeviceError>,
    },

    /// One state of a device changed.
    DeviceStateChanged {
        device: Device,
        state_type_id: StateTypeId,
        value: ParamValue,
    },

    /// A plugin-emitted or state-derived event.
    EventTriggered { event: Event },

    /// An asynchronous action execution finished.
    ActionExecutionFinished {
        action_id: ActionId,
        status: Result<(), DeviceError>,
    },

    /// A pairing transaction finished. On success the id of the device now
    /// going through setup is carried.
    PairingFinished {
        transaction_id: PairingTransactionId,
        status: Result<DeviceId, DeviceError>,
    },
}

impl HubNotification {
    /// A stable name for logging and filtering.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Loaded => "Loaded",
            Self::DevicesDiscovered { .. } => "DevicesDiscovered",
            Self::DeviceSetupFinished { .. } => "DeviceSetupFinished",
            Self::DeviceStateChanged { .. } => "DeviceStateChanged",
            Self::EventTriggered { .. } => "EventTriggered",
            Self::ActionExecutionFinished { .. } => "ActionExecutionFinished",
            Self::PairingFinished { .. } => "PairingFinished",
        }
    }

    /// The device this notification is scoped to, if any.
    pub fn device_id(&self) -> Option<DeviceId> {
        match self {
            Self::DeviceSetupFinished { device, .. }
            | Self::DeviceStateChanged { device, .. } => Some(device.id()),
            Self::EventTriggered { event } => Some(event.device_id),
            _ => None,
        }
    }
}

/// Broadcast bus distributing [`HubNotification`]s to all subscribers.
#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<HubNotification>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// The capacity bounds how many notifications are buffered for slow
    /// subscribers before they start lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a notification to all subscribers. Returns `true` if at least
    /// one subscriber received it.
    pub fn publish(&self, notification: HubNotification) -> bool {
        self.tx.send(notification).is_ok()
    }

    /// Subscribe to all notifications.
    pub fn subscribe(&self) -> NotificationReceiver {
        NotificationReceiver {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the notification bus.
pub struct NotificationReceiver {
    rx: broadcast::Receiver<HubNotification>,
}

impl NotificationReceiver {
    /// Receive the next notification. Returns `None` once the bus is closed.
    /// A lagging receiver skips the dropped notifications and continues.
    pub async fn recv(&mut self) -> Option<HubNotification> {
        loop {
            match self.rx.recv().await {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "notification receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a notification without blocking.
    pub fn try_recv(&mut self) -> Option<HubNotification> {
        self.rx.try_recv().ok()
    }
}
