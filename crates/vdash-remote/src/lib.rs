//! ---
//! vdash_section: "02-messaging-ipc-data-model"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Remote vehicle model and collaborator interfaces."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
//! Remote vehicle client abstraction for vdash.
//!
//! The telematics service is reached through [`RemoteVehicleClient`]. The
//! dashboard side effects (LEDs, display, vehicle menu, reboot) are reached
//! through the narrow collaborator traits in [`collaborators`].

pub mod client;
pub mod collaborators;
pub mod error;
pub mod sim;
pub mod types;

pub use client::{RemoteVehicleClient, SharedClient};
pub use collaborators::{
    CommandReboot, RebootAction, RecordingReboot, RecordingSignalSink, Signal, SignalKind,
    SignalSink, SwitchLock, TracingSignalSink, VehicleSwitchGate,
};
pub use error::{RemoteError, Result};
pub use sim::SimulatedVehicle;
pub use types::{
    ClimateState, ControlOperation, Domain, PendingRequest, RequestEvent, RequestStatus,
    TemperatureUnit, VehicleInfo, KELVIN_OFFSET,
};
