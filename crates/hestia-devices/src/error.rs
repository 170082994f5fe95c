//! Error taxonomy and call-status types for orchestrator operations.

use serde::{Deserialize, Serialize};

use crate::ids::{
    ActionTypeId, DeviceClassId, DeviceDescriptorId, DeviceId, EventTypeId,
    PairingTransactionId, PluginId, StateTypeId,
};

/// Result type for orchestrator operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors that can occur when working with devices. Plugin errors are
/// surfaced to callers verbatim.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum DeviceError {
    #[error("plugin not found: {0}")]
    PluginNotFound(PluginId),

    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("device class not found: {0}")]
    DeviceClassNotFound(DeviceClassId),

    #[error("action type not found: {0}")]
    ActionTypeNotFound(ActionTypeId),

    #[error("state type not found: {0}")]
    StateTypeNotFound(StateTypeId),

    #[error("event type not found: {0}")]
    EventTypeNotFound(EventTypeId),

    #[error("device descriptor not found: {0}")]
    DeviceDescriptorNotFound(DeviceDescriptorId),

    #[error("pairing transaction not found: {0}")]
    PairingTransactionNotFound(PairingTransactionId),

    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("parameter {0} is not declared in the schema")]
    UnknownParameter(String),

    /// The plugin rejected setup or pairing; the device is discarded.
    #[error("device setup failed")]
    SetupFailed,

    #[error("device id already in use: {0}")]
    DuplicateUuid(DeviceId),

    #[error("create method not supported for this device class")]
    CreationMethodNotSupported,

    #[error("setup method not supported for this device class")]
    SetupMethodNotSupported,

    #[error("hardware not available: {0}")]
    HardwareNotAvailable(String),

    #[error("hardware failure: {0}")]
    HardwareFailure(String),

    #[error("device busy: {0}")]
    DeviceInUse(DeviceId),
}

/// Outcome of an orchestrator call that may complete asynchronously.
///
/// `Async` means exactly one completion notification will follow later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Done,
    Async,
}

/// Status a plugin reports for device setup and pairing confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetupStatus {
    /// Setup finished successfully.
    Success,
    /// Setup failed; the device will not be functional.
    Failure,
    /// The plugin will report the result through its notification stream.
    /// Only valid as a direct return value, never inside a finished
    /// notification.
    Async,
}
