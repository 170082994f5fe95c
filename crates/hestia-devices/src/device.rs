//! Configured devices and their states.

use serde::Serialize;

use crate::ids::{DeviceClassId, DeviceId, PluginId, StateTypeId};
use crate::params::{ParamList, ParamValue};

/// The current value of one state of a configured device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct State {
    pub state_type_id: StateTypeId,
    pub device_id: DeviceId,
    pub value: ParamValue,
}

impl State {
    pub fn new(state_type_id: StateTypeId, device_id: DeviceId, value: ParamValue) -> Self {
        Self {
            state_type_id,
            device_id,
            value,
        }
    }
}

/// A configured, persisted instance of a device class.
///
/// The orchestrator is the sole owner of devices; plugins receive a borrowed
/// reference scoped to a single call and correlate callbacks by [`DeviceId`].
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    id: DeviceId,
    plugin_id: PluginId,
    device_class_id: DeviceClassId,
    name: String,
    params: ParamList,
    states: Vec<State>,
    setup_complete: bool,
}

impl Device {
    pub fn new(plugin_id: PluginId, id: DeviceId, device_class_id: DeviceClassId) -> Self {
        Self {
            id,
            plugin_id,
            device_class_id,
            name: String::new(),
            params: ParamList::new(),
            states: Vec::new(),
            setup_complete: false,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn plugin_id(&self) -> PluginId {
        self.plugin_id
    }

    pub fn device_class_id(&self) -> DeviceClassId {
        self.device_class_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn params(&self) -> &ParamList {
        &self.params
    }

    pub fn param_value(&self, name: &str) -> Option<&ParamValue> {
        self.params.value(name)
    }

    pub(crate) fn set_params(&mut self, params: ParamList) {
        self.params = params;
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn state_value(&self, state_type_id: StateTypeId) -> Option<&ParamValue> {
        self.states
            .iter()
            .find(|s| s.state_type_id == state_type_id)
            .map(|s| &s.value)
    }

    pub(crate) fn set_states(&mut self, states: Vec<State>) {
        self.states = states;
    }

    /// Update the value of one state. Returns `false` when the device holds
    /// no state of that type.
    pub(crate) fn set_state_value(&mut self, state_type_id: StateTypeId, value: ParamValue) -> bool {
        match self
            .states
            .iter_mut()
            .find(|s| s.state_type_id == state_type_id)
        {
            Some(state) => {
                state.value = value;
                true
            }
            None => false,
        }
    }

    /// Whether setup has completed successfully at least once.
    pub fn setup_complete(&self) -> bool {
        self.setup_complete
    }

    /// Mark setup as completed. The flag is monotonic; it is never cleared
    /// for a live device instance.
    pub(crate) fn mark_setup_complete(&mut self) {
        self.setup_complete = true;
    }
}
