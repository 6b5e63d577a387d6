//! ---
//! vdash_section: "02-messaging-ipc-data-model"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Remote vehicle model and collaborator interfaces."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use thiserror::Error;

/// Result alias for remote service calls.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Failures reported by the telematics service or the transport in front of it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("service rejected the request: {0}")]
    Rejected(String),
    #[error("operation not supported by vehicle: {0}")]
    Unsupported(&'static str),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}
