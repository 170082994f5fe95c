//! Catalog descriptors: parameter schemas, vendors, device classes and
//! discovery descriptors.
//!
//! Everything in this module is immutable once a plugin has registered it;
//! the orchestrator hands out clones.

use serde::{Deserialize, Serialize};

use crate::hardware::HardwareResources;
use crate::ids::{
    ActionTypeId, DeviceClassId, DeviceDescriptorId, EventTypeId, ParamTypeId, PluginId,
    StateTypeId, VendorId,
};
use crate::params::{ParamKind, ParamList, ParamValue};

/// Schema slot describing one parameter: its name, primitive kind and the
/// constraints a runtime value must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamType {
    pub id: ParamTypeId,
    pub name: String,
    pub kind: ParamKind,
    /// Inclusive lower bound, compared in the primitive's domain.
    pub min: Option<ParamValue>,
    /// Inclusive upper bound, compared in the primitive's domain.
    pub max: Option<ParamValue>,
    /// If non-empty, a value must equal one of these.
    pub allowed_values: Vec<ParamValue>,
    /// Materialised into the effective list when the parameter is omitted.
    pub default_value: Option<ParamValue>,
}

impl ParamType {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            id: ParamTypeId::new(),
            name: name.into(),
            kind,
            min: None,
            max: None,
            allowed_values: Vec::new(),
            default_value: None,
        }
    }

    pub fn with_min(mut self, min: impl Into<ParamValue>) -> Self {
        self.min = Some(min.into());
        self
    }

    pub fn with_max(mut self, max: impl Into<ParamValue>) -> Self {
        self.max = Some(max.into());
        self
    }

    pub fn with_allowed_values(mut self, values: Vec<ParamValue>) -> Self {
        self.allowed_values = values;
        self
    }

    pub fn with_default_value(mut self, value: impl Into<ParamValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// A device vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: VendorId,
    pub name: String,
}

impl Vendor {
    pub fn new(id: VendorId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Describes one state a device of a class holds. Every state type also
/// produces an implicit event type with the same id, emitted on each change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateType {
    pub id: StateTypeId,
    pub name: String,
    pub kind: ParamKind,
    pub default_value: ParamValue,
}

impl StateType {
    pub fn new(id: StateTypeId, name: impl Into<String>, kind: ParamKind) -> Self {
        let default_value = kind.default_value();
        Self {
            id,
            name: name.into(),
            kind,
            default_value,
        }
    }

    pub fn with_default_value(mut self, value: impl Into<ParamValue>) -> Self {
        self.default_value = value.into();
        self
    }
}

/// Describes a custom event a plugin may emit for devices of a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventType {
    pub id: EventTypeId,
    pub name: String,
    pub param_types: Vec<ParamType>,
}

impl EventType {
    pub fn new(id: EventTypeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            param_types: Vec::new(),
        }
    }

    pub fn with_param_types(mut self, param_types: Vec<ParamType>) -> Self {
        self.param_types = param_types;
        self
    }
}

/// Describes an action devices of a class accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionType {
    pub id: ActionTypeId,
    pub name: String,
    pub param_types: Vec<ParamType>,
}

impl ActionType {
    pub fn new(id: ActionTypeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            param_types: Vec::new(),
        }
    }

    pub fn with_param_types(mut self, param_types: Vec<ParamType>) -> Self {
        self.param_types = param_types;
        self
    }
}

bitflags::bitflags! {
    /// The ways devices of a class come into existence.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CreateMethods: u8 {
        /// Created directly by a user with explicit parameters.
        const USER = 0b001;
        /// Created from a descriptor returned by discovery.
        const DISCOVERY = 0b010;
        /// Created automatically by the plugin.
        const AUTO = 0b100;
    }
}

impl Serialize for CreateMethods {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for CreateMethods {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Self::from_bits(bits)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid create methods: {:#b}", bits)))
    }
}

/// How initial setup of a device is performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SetupMethod {
    /// No interaction needed, the device works right after adding.
    #[default]
    JustAdd,
    /// The device displays a PIN the user must confirm.
    DisplayPin,
    /// The user must enter a PIN printed on the device.
    EnterPin,
    /// The user must press a button on the device.
    PushButton,
}

/// Immutable catalog entry describing a device type: which plugin drives it,
/// how instances are created and set up, which shared hardware it needs, and
/// the schemas its parameters, states and actions must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceClass {
    pub id: DeviceClassId,
    pub plugin_id: PluginId,
    pub vendor_id: VendorId,
    pub name: String,
    pub create_methods: CreateMethods,
    pub setup_method: SetupMethod,
    pub required_hardware: HardwareResources,
    pub param_types: Vec<ParamType>,
    pub discovery_param_types: Vec<ParamType>,
    pub state_types: Vec<StateType>,
    pub event_types: Vec<EventType>,
    pub action_types: Vec<ActionType>,
}

impl DeviceClass {
    pub fn new(
        id: DeviceClassId,
        plugin_id: PluginId,
        vendor_id: VendorId,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            plugin_id,
            vendor_id,
            name: name.into(),
            create_methods: CreateMethods::USER,
            setup_method: SetupMethod::JustAdd,
            required_hardware: HardwareResources::empty(),
            param_types: Vec::new(),
            discovery_param_types: Vec::new(),
            state_types: Vec::new(),
            event_types: Vec::new(),
            action_types: Vec::new(),
        }
    }

    pub fn with_create_methods(mut self, methods: CreateMethods) -> Self {
        self.create_methods = methods;
        self
    }

    pub fn with_setup_method(mut self, method: SetupMethod) -> Self {
        self.setup_method = method;
        self
    }

    pub fn with_required_hardware(mut self, hardware: HardwareResources) -> Self {
        self.required_hardware = hardware;
        self
    }

    pub fn with_param_types(mut self, param_types: Vec<ParamType>) -> Self {
        self.param_types = param_types;
        self
    }

    pub fn with_discovery_param_types(mut self, param_types: Vec<ParamType>) -> Self {
        self.discovery_param_types = param_types;
        self
    }

    pub fn with_state_types(mut self, state_types: Vec<StateType>) -> Self {
        self.state_types = state_types;
        self
    }

    pub fn with_event_types(mut self, event_types: Vec<EventType>) -> Self {
        self.event_types = event_types;
        self
    }

    pub fn with_action_types(mut self, action_types: Vec<ActionType>) -> Self {
        self.action_types = action_types;
        self
    }

    pub fn action_type(&self, id: ActionTypeId) -> Option<&ActionType> {
        self.action_types.iter().find(|t| t.id == id)
    }

    pub fn state_type(&self, id: StateTypeId) -> Option<&StateType> {
        self.state_types.iter().find(|t| t.id == id)
    }
}

/// A candidate device produced by discovery. Lives only between discovery
/// completion and pairing/add or eviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceDescriptorId,
    pub device_class_id: DeviceClassId,
    pub title: String,
    pub params: ParamList,
}

impl DeviceDescriptor {
    pub fn new(device_class_id: DeviceClassId, title: impl Into<String>) -> Self {
        Self {
            id: DeviceDescriptorId::new(),
            device_class_id,
            title: title.into(),
            params: ParamList::new(),
        }
    }

    pub fn with_params(mut self, params: ParamList) -> Self {
        self.params = params;
        self
    }
}
