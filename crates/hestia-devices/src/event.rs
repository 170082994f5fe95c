//! Events and action invocations.

use serde::{Deserialize, Serialize};

use crate::ids::{ActionId, ActionTypeId, DeviceId, EventTypeId};
use crate::params::{Param, ParamList, ParamValue};

/// Something that happened on a device: either a plugin-emitted custom event
/// or the synthetic event produced by a state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type_id: EventTypeId,
    pub device_id: DeviceId,
    pub params: ParamList,
    /// `true` when this event was synthesized from a state change; its
    /// param list is then `[("value", new_value)]`.
    pub state_based: bool,
}

impl Event {
    pub fn new(event_type_id: EventTypeId, device_id: DeviceId, params: ParamList) -> Self {
        Self {
            event_type_id,
            device_id,
            params,
            state_based: false,
        }
    }

    /// Build the synthetic event for a state change.
    pub(crate) fn from_state_change(
        event_type_id: EventTypeId,
        device_id: DeviceId,
        value: ParamValue,
    ) -> Self {
        Self {
            event_type_id,
            device_id,
            params: ParamList::from_iter([Param::new("value", value)]),
            state_based: true,
        }
    }
}

/// A request to execute one action on one device. The `id` is unique per
/// invocation and correlates asynchronous completions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub action_type_id: ActionTypeId,
    pub device_id: DeviceId,
    pub params: ParamList,
}

impl Action {
    pub fn new(action_type_id: ActionTypeId, device_id: DeviceId) -> Self {
        Self {
            id: ActionId::new(),
            action_type_id,
            device_id,
            params: ParamList::new(),
        }
    }

    pub fn with_params(mut self, params: ParamList) -> Self {
        self.params = params;
        self
    }
}
