//! Shared hardware resources and the bus that multiplexes them.
//!
//! The bus owns the process-wide resources driver plugins share: the 433 and
//! 868 MHz radios, the global timer and UPnP discovery. Transports push raw
//! stimuli in through the `inject_*` methods; the orchestrator's pump decides
//! which plugins are interested and fans the stimulus out to them.
//!
//! Contention is resolved by fan-out, never by exclusion: every interested
//! plugin receives every stimulus.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ids::{DeviceId, PluginId};
use crate::manager::HubMessage;

/// Period of the global plugin timer.
pub const TIMER_INTERVAL: Duration = Duration::from_millis(15_000);

bitflags::bitflags! {
    /// Shared hardware resources a device class may require. Plugins should
    /// not create their own timers but request [`HardwareResources::TIMER`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HardwareResources: u8 {
        const RADIO_433 = 0b0001;
        const RADIO_868 = 0b0010;
        const TIMER = 0b0100;
        const UPNP_DISCOVERY = 0b1000;
    }
}

impl Default for HardwareResources {
    fn default() -> Self {
        Self::empty()
    }
}

impl Serialize for HardwareResources {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for HardwareResources {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Self::from_bits(bits).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid hardware resources: {:#b}", bits))
        })
    }
}

/// One of the two sub-GHz radio bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioBand {
    Mhz433,
    Mhz868,
}

impl RadioBand {
    /// The hardware resource flag this band corresponds to.
    pub fn resource(self) -> HardwareResources {
        match self {
            Self::Mhz433 => HardwareResources::RADIO_433,
            Self::Mhz868 => HardwareResources::RADIO_868,
        }
    }
}

impl std::fmt::Display for RadioBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mhz433 => write!(f, "433MHz"),
            Self::Mhz868 => write!(f, "868MHz"),
        }
    }
}

/// A device found by UPnP discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpnpDeviceDescriptor {
    /// URL of the device description document.
    pub location: String,
    pub friendly_name: String,
    pub uuid: Option<String>,
}

/// Raw hardware stimulus delivered onto the orchestrator's queue.
#[derive(Debug, Clone)]
pub(crate) enum HardwareEvent {
    RadioFrame {
        band: RadioBand,
        pulses: Vec<i32>,
    },
    TimerTick,
    UpnpDiscoveryFinished {
        plugin_id: PluginId,
        descriptors: Vec<UpnpDeviceDescriptor>,
    },
    UpnpNotify {
        payload: Vec<u8>,
    },
}

#[derive(Default)]
struct TimerState {
    users: HashSet<DeviceId>,
    task: Option<JoinHandle<()>>,
}

/// Central owner of the shared hardware resources.
///
/// Created by the orchestrator at startup and torn down with it; there is no
/// module-level singleton.
pub struct HardwareBus {
    tx: mpsc::UnboundedSender<HubMessage>,
    timer: Mutex<TimerState>,
    available: Mutex<HardwareResources>,
}

impl HardwareBus {
    pub(crate) fn new(tx: mpsc::UnboundedSender<HubMessage>) -> Self {
        Self {
            tx,
            timer: Mutex::new(TimerState::default()),
            available: Mutex::new(HardwareResources::TIMER),
        }
    }

    /// Record that a transport for the given resources is up. A resource
    /// that never gets a transport only means its stimuli never arrive;
    /// device setup does not fail because of it.
    pub fn transport_attached(&self, resources: HardwareResources) {
        let mut available = self.available.lock().expect("hardware lock poisoned");
        available.insert(resources);
        debug!(?resources, "hardware transport attached");
    }

    pub fn is_available(&self, resources: HardwareResources) -> bool {
        self.available
            .lock()
            .expect("hardware lock poisoned")
            .contains(resources)
    }

    /// Warn once per missing resource a freshly set up device depends on.
    pub(crate) fn warn_if_unavailable(&self, required: HardwareResources) {
        let available = *self.available.lock().expect("hardware lock poisoned");
        let missing = required - available;
        if !missing.is_empty() {
            warn!(
                ?missing,
                "required hardware is not available; dependent plugins will not receive its events"
            );
        }
    }

    /// Push a raw radio frame (pulse widths) received on `band`.
    pub fn inject_radio_frame(&self, band: RadioBand, pulses: Vec<i32>) {
        self.send(HardwareEvent::RadioFrame { band, pulses });
    }

    /// Push the result of a UPnP discovery run requested by `plugin_id`.
    pub fn inject_upnp_discovery_finished(
        &self,
        plugin_id: PluginId,
        descriptors: Vec<UpnpDeviceDescriptor>,
    ) {
        self.send(HardwareEvent::UpnpDiscoveryFinished {
            plugin_id,
            descriptors,
        });
    }

    /// Push an unsolicited UPnP multicast notification.
    pub fn inject_upnp_notify(&self, payload: Vec<u8>) {
        self.send(HardwareEvent::UpnpNotify { payload });
    }

    fn send(&self, event: HardwareEvent) {
        if self.tx.send(HubMessage::Hardware(event)).is_err() {
            debug!("orchestrator queue closed; dropping hardware event");
        }
    }

    /// Register a device as a timer user. On the first user the periodic
    /// tick is scheduled, and one immediate kick tick is emitted so plugins
    /// can initialise.
    pub(crate) fn timer_subscribe(&self, device_id: DeviceId) {
        let mut timer = self.timer.lock().expect("hardware lock poisoned");
        timer.users.insert(device_id);
        if timer.task.is_some() {
            return;
        }

        debug!("first timer user, starting global timer");
        let tx = self.tx.clone();
        timer.task = Some(tokio::spawn(async move {
            // The first tick of an interval completes immediately, which
            // doubles as the kick tick for fresh subscribers.
            let mut interval = tokio::time::interval(TIMER_INTERVAL);
            loop {
                interval.tick().await;
                if tx.send(HubMessage::Hardware(HardwareEvent::TimerTick)).is_err() {
                    break;
                }
            }
        }));
    }

    /// Deregister a device. The tick stops when the last user is gone.
    pub(crate) fn timer_unsubscribe(&self, device_id: DeviceId) {
        let mut timer = self.timer.lock().expect("hardware lock poisoned");
        timer.users.remove(&device_id);
        if timer.users.is_empty() {
            if let Some(task) = timer.task.take() {
                debug!("last timer user removed, stopping global timer");
                task.abort();
            }
        }
    }

    /// Whether the global timer is currently scheduled.
    pub fn timer_active(&self) -> bool {
        self.timer
            .lock()
            .expect("hardware lock poisoned")
            .task
            .is_some()
    }

    pub(crate) fn shutdown(&self) {
        let mut timer = self.timer.lock().expect("hardware lock poisoned");
        timer.users.clear();
        if let Some(task) = timer.task.take() {
            task.abort();
        }
    }
}

impl Drop for HardwareBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}
