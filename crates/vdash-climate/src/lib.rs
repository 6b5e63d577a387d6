//! ---
//! vdash_section: "01-core-functionality"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Remote climate control and command correlation."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
//! Remote climate control for the selected vehicle.
//!
//! Commands are fire-and-forget on the remote side. [`ClimateController`]
//! correlates each issued command with the pending request it produces and
//! reports the outcome through the signal sink once that request settles or
//! the deadline passes.

pub mod controller;
pub mod error;
pub mod metrics;
pub mod policy;

pub use controller::{
    finder_job_id, tracker_job_id, ClimateController, Gate, FINDER_JOB, TRACKER_JOB,
};
pub use error::{ClimateError, Result};
pub use metrics::ClimateMetrics;
pub use policy::ClimatePolicy;
