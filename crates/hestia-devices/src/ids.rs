//! Typed identifiers for the hub's entities.
//!
//! All identifiers are 128-bit UUIDs compared by value and formatted as
//! canonical strings for persistence. Each logical kind gets its own newtype
//! so a `DeviceId` can never be passed where a `PluginId` is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! typed_uuid {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an identifier from its canonical string form.
            pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_string(s)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

typed_uuid!(
    /// Unique identifier for a driver plugin.
    PluginId
);
typed_uuid!(
    /// Unique identifier for a vendor.
    VendorId
);
typed_uuid!(
    /// Unique identifier for a device class.
    DeviceClassId
);
typed_uuid!(
    /// Unique identifier for a configured device.
    DeviceId
);
typed_uuid!(
    /// Unique identifier for a discovered device descriptor.
    DeviceDescriptorId
);
typed_uuid!(
    /// Unique identifier for a parameter type.
    ParamTypeId
);
typed_uuid!(
    /// Unique identifier for a state type.
    StateTypeId
);
typed_uuid!(
    /// Unique identifier for an event type.
    EventTypeId
);
typed_uuid!(
    /// Unique identifier for an action type.
    ActionTypeId
);
typed_uuid!(
    /// Unique identifier for a single action invocation.
    ActionId
);
typed_uuid!(
    /// Correlation token for a multi-step pairing.
    PairingTransactionId
);

impl From<StateTypeId> for EventTypeId {
    /// State changes synthesize events whose type id equals the state type id.
    fn from(id: StateTypeId) -> Self {
        Self(id.0)
    }
}
