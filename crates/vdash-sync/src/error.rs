//! ---
//! vdash_section: "07-resilience-fault-tolerance"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Remote synchronisation engine and its backoff policy."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use thiserror::Error;
use vdash_remote::RemoteError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("job '{0}' is already registered")]
    DuplicateJob(String),
    #[error("job '{0}' is not registered")]
    JobNotFound(String),
    #[error("job '{0}' requires a non-zero interval")]
    InvalidInterval(String),
    #[error("remote fetch failed: {0}")]
    Fetch(#[from] RemoteError),
}
