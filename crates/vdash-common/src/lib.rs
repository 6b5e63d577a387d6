//! ---
//! vdash_section: "01-core-functionality"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Shared primitives and utilities for the dashboard runtime."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
//! Shared primitives for the vdash workspace.
//! This crate exposes configuration loading, tracing initialisation and
//! the time-of-day helpers used by the polling scheduler.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, ClimateConfig, LoggingConfig, MetricsConfig, RebootConfig, SimulationConfig,
    SyncConfig, VehicleConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{DayPeriod, DaySchedule};
