//! ---
//! vdash_section: "07-resilience-fault-tolerance"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Remote synchronisation engine and its backoff policy."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
//! Keeps the local read cache of the remote vehicle fresh.
//!
//! [`SyncEngine`] owns every periodic poll. Scheduled jobs never run twice
//! concurrently, a failed fetch pauses all jobs until a cooldown elapses or
//! the next successful update, and repeated skips of the built-in jobs
//! escalate to a job restart and finally to a device reboot.

pub mod engine;
pub mod error;
pub mod metrics;
pub mod policy;

pub use engine::{EngineState, JobSnapshot, SyncEngine, UpdateOutcome, FULL_REFRESH_JOB, MAIN_JOB};
pub use error::{Result, SyncError};
pub use metrics::SyncMetrics;
pub use policy::SyncPolicy;
