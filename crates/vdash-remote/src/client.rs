//! ---
//! vdash_section: "02-messaging-ipc-data-model"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Remote vehicle model and collaborator interfaces."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::{
    ClimateState, ControlOperation, Domain, PendingRequest, RequestEvent, TemperatureUnit,
    VehicleInfo,
};

/// Shared handle used by the engine and the controller.
pub type SharedClient = Arc<dyn RemoteVehicleClient>;

/// Read model and write surface of the telematics service for one vehicle.
///
/// Reads return the values cached by the last successful [`fetch`](Self::fetch).
#[async_trait]
pub trait RemoteVehicleClient: Send + Sync {
    /// Refresh the given domains from the service.
    async fn fetch(&self, domains: &[Domain], include_capabilities: bool) -> Result<()>;

    fn vehicle(&self) -> VehicleInfo;

    fn climate_control_capable(&self) -> bool;

    fn climate_state(&self) -> ClimateState;

    /// Target temperature in Celsius.
    fn target_temperature(&self) -> f64;

    /// Unit accepted by [`write_target_temperature`](Self::write_target_temperature).
    fn temperature_unit(&self) -> TemperatureUnit;

    /// Fire-and-forget write of the climatisation command attribute.
    async fn write_climate_operation(&self, operation: ControlOperation) -> Result<()>;

    /// Write the target temperature, expressed in [`temperature_unit`](Self::temperature_unit).
    async fn write_target_temperature(&self, value: f64) -> Result<()>;

    fn pending_requests(&self) -> Vec<PendingRequest>;

    /// Subscribe to changes of the pending-requests collection and its entries.
    fn subscribe_requests(&self) -> broadcast::Receiver<RequestEvent>;
}
