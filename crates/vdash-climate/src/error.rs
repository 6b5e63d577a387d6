//! ---
//! vdash_section: "01-core-functionality"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Remote climate control and command correlation."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use thiserror::Error;
use vdash_remote::{ClimateState, RemoteError};
use vdash_sync::SyncError;

pub type Result<T> = std::result::Result<T, ClimateError>;

/// Errors raised synchronously to the caller. Command outcomes are not errors;
/// they only reach the signal sink.
#[derive(Debug, Error)]
pub enum ClimateError {
    #[error("vehicle {vin} does not support remote climatisation")]
    Compatibility { vin: String },
    #[error("a climate command is already in progress")]
    OperationAlreadyRunning,
    #[error("climatisation is already {0}")]
    AlreadyInRequestedState(ClimateState),
    #[error("target temperature {value} outside {min}..={max} °C")]
    OutOfRange { value: f64, min: f64, max: f64 },
    #[error("failed to set target temperature: {0}")]
    SetTemperature(#[source] RemoteError),
    #[error("climate refresh failed: {0}")]
    Sync(#[from] SyncError),
    #[error("failed to send climate command: {0}")]
    CommandWrite(#[source] RemoteError),
}
