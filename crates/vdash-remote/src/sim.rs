//! ---
//! vdash_section: "11-simulation"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "In-process simulated telematics service."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
//! Simulated telematics service.
//!
//! Commands written through the client are staged and surface as `QUEUED`
//! pending requests on the next fetch. Each later fetch moves them through
//! `IN_PROGRESS` towards their outcome, after which they leave the collection.
//! Every change is published on the request broadcast channel.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};
use uuid::Uuid;
use vdash_common::config::{SimulationConfig, VehicleConfig};

use crate::client::RemoteVehicleClient;
use crate::error::{RemoteError, Result};
use crate::types::{
    ClimateState, ControlOperation, Domain, PendingRequest, RequestEvent, RequestStatus,
    TemperatureUnit, VehicleInfo,
};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct SimRequest {
    request: PendingRequest,
    remaining_steps: u32,
    outcome: RequestStatus,
    /// Frozen requests only change through [`SimulatedVehicle::set_request_status`].
    frozen: bool,
}

#[derive(Debug)]
struct SimState {
    info: VehicleInfo,
    capable: bool,
    climate_state: ClimateState,
    target_celsius: f64,
    unit: TemperatureUnit,
    steps_to_outcome: u32,
    outcome_override: Option<RequestStatus>,
    requests: Vec<SimRequest>,
    staged: Vec<SimRequest>,
    fail_next: u32,
    failure_rate: f64,
    reject_writes: bool,
    rng: StdRng,
    fetch_log: Vec<(Vec<Domain>, bool)>,
    operation_writes: Vec<ControlOperation>,
    temperature_writes: Vec<f64>,
}

/// In-process [`RemoteVehicleClient`] used by the daemon and the test suites.
#[derive(Debug)]
pub struct SimulatedVehicle {
    state: Mutex<SimState>,
    events: broadcast::Sender<RequestEvent>,
    hold: watch::Sender<bool>,
    fetches: AtomicU64,
}

impl SimulatedVehicle {
    /// Climate-capable vehicle, climate off, Celsius settings, outcomes after two steps.
    pub fn new(info: VehicleInfo) -> Self {
        Self::with_state(info, &SimulationConfig::default(), ClimateState::Off)
    }

    pub fn from_config(vehicle: &VehicleConfig, config: &SimulationConfig) -> Result<Self> {
        let climate_state = config.initial_climate_state.parse::<ClimateState>()?;
        let info = VehicleInfo {
            vin: vehicle.vin.clone(),
            nickname: vehicle.nickname.clone(),
        };
        Ok(Self::with_state(info, config, climate_state))
    }

    fn with_state(info: VehicleInfo, config: &SimulationConfig, climate_state: ClimateState) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (hold, _) = watch::channel(false);
        Self {
            state: Mutex::new(SimState {
                info,
                capable: config.climate_capable,
                climate_state,
                target_celsius: config.initial_target_temperature,
                unit: if config.kelvin_only {
                    TemperatureUnit::Kelvin
                } else {
                    TemperatureUnit::Celsius
                },
                steps_to_outcome: config.steps_to_outcome,
                outcome_override: None,
                requests: Vec::new(),
                staged: Vec::new(),
                fail_next: 0,
                failure_rate: config.transport_failure_rate,
                reject_writes: false,
                rng: StdRng::seed_from_u64(config.seed),
                fetch_log: Vec::new(),
                operation_writes: Vec::new(),
                temperature_writes: Vec::new(),
            }),
            events,
            hold,
            fetches: AtomicU64::new(0),
        }
    }

    pub fn set_climate_capable(&self, capable: bool) {
        self.state.lock().capable = capable;
    }

    pub fn set_climate_state(&self, state: ClimateState) {
        self.state.lock().climate_state = state;
    }

    pub fn set_temperature_unit(&self, unit: TemperatureUnit) {
        self.state.lock().unit = unit;
    }

    pub fn set_steps_to_outcome(&self, steps: u32) {
        self.state.lock().steps_to_outcome = steps;
    }

    /// Terminal status given to commands written from now on. `None` means success.
    pub fn set_outcome(&self, outcome: Option<RequestStatus>) {
        self.state.lock().outcome_override = outcome;
    }

    /// Fail the next `count` fetches with a transport error.
    pub fn fail_next_fetches(&self, count: u32) {
        self.state.lock().fail_next = count;
    }

    /// Reject subsequent attribute writes.
    pub fn reject_writes(&self, reject: bool) {
        self.state.lock().reject_writes = reject;
    }

    /// Block every fetch in flight until [`release_fetches`](Self::release_fetches).
    pub fn hold_fetches(&self) {
        self.hold.send_replace(true);
    }

    pub fn release_fetches(&self) {
        self.hold.send_replace(false);
    }

    /// Number of fetch calls received, including held and failed ones.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Domains and capability flag of each completed fetch, oldest first.
    pub fn fetch_log(&self) -> Vec<(Vec<Domain>, bool)> {
        self.state.lock().fetch_log.clone()
    }

    pub fn operation_writes(&self) -> Vec<ControlOperation> {
        self.state.lock().operation_writes.clone()
    }

    /// Raw values written to the target temperature attribute.
    pub fn temperature_writes(&self) -> Vec<f64> {
        self.state.lock().temperature_writes.clone()
    }

    /// Add a request that was not issued through this client. It never advances on its own.
    pub fn inject_request(&self, operation: ControlOperation, status: RequestStatus) -> String {
        let id = Uuid::new_v4().to_string();
        let snapshot = {
            let mut state = self.state.lock();
            state.requests.push(SimRequest {
                request: PendingRequest::new(id.clone(), operation, status),
                remaining_steps: 0,
                outcome: status,
                frozen: true,
            });
            snapshot(&state.requests)
        };
        self.publish(RequestEvent::CollectionChanged(snapshot));
        id
    }

    /// Force a status change on a known request. Returns false for unknown ids.
    pub fn set_request_status(&self, id: &str, status: RequestStatus) -> bool {
        let changed = {
            let mut state = self.state.lock();
            let Some(entry) = state.requests.iter_mut().find(|r| r.request.id == id) else {
                return false;
            };
            entry.request.status = status;
            entry.request.clone()
        };
        self.publish(RequestEvent::StatusChanged(changed));
        true
    }

    /// Republish the current collection without changing it.
    pub fn publish_collection(&self) {
        let snapshot = snapshot(&self.state.lock().requests);
        self.publish(RequestEvent::CollectionChanged(snapshot));
    }

    fn publish(&self, event: RequestEvent) {
        // No receivers is fine; nobody is correlating right now.
        let _ = self.events.send(event);
    }

    fn advance(state: &mut SimState) -> Vec<RequestEvent> {
        let mut events = Vec::new();
        let mut collection_changed = false;

        for entry in state.requests.iter_mut().filter(|r| !r.frozen) {
            if !entry.request.status.is_ongoing() {
                continue;
            }
            if entry.remaining_steps > 0 {
                entry.remaining_steps -= 1;
                if entry.request.status != RequestStatus::InProgress {
                    entry.request.status = RequestStatus::InProgress;
                    events.push(RequestEvent::StatusChanged(entry.request.clone()));
                }
                continue;
            }
            entry.request.status = entry.outcome;
            events.push(RequestEvent::StatusChanged(entry.request.clone()));
            if entry.outcome.is_success() {
                state.climate_state = match entry.request.operation {
                    ControlOperation::Start => ClimateState::Heating,
                    ControlOperation::Stop => ClimateState::Off,
                };
            }
        }

        let before = state.requests.len();
        state
            .requests
            .retain(|r| r.frozen || r.request.status.is_ongoing());
        if state.requests.len() != before {
            collection_changed = true;
        }

        if !state.staged.is_empty() {
            let staged = std::mem::take(&mut state.staged);
            state.requests.extend(staged);
            collection_changed = true;
        }

        if collection_changed {
            events.push(RequestEvent::CollectionChanged(snapshot(&state.requests)));
        }
        events
    }
}

fn snapshot(requests: &[SimRequest]) -> Vec<PendingRequest> {
    requests.iter().map(|r| r.request.clone()).collect()
}

#[async_trait]
impl RemoteVehicleClient for SimulatedVehicle {
    async fn fetch(&self, domains: &[Domain], include_capabilities: bool) -> Result<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut hold = self.hold.subscribe();
        // A closed channel cannot happen while `self` is alive.
        let _ = hold.wait_for(|held| !*held).await;

        let events = {
            let mut state = self.state.lock();
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(RemoteError::Transport("simulated connection reset".into()));
            }
            let rate = state.failure_rate;
            if rate > 0.0 && state.rng.gen_bool(rate) {
                return Err(RemoteError::Transport("simulated random outage".into()));
            }
            state
                .fetch_log
                .push((domains.to_vec(), include_capabilities));
            Self::advance(&mut state)
        };

        trace!(target: "vdash::remote", domains = ?domains, include_capabilities, events = events.len(), "simulated fetch");
        for event in events {
            self.publish(event);
        }
        Ok(())
    }

    fn vehicle(&self) -> VehicleInfo {
        self.state.lock().info.clone()
    }

    fn climate_control_capable(&self) -> bool {
        self.state.lock().capable
    }

    fn climate_state(&self) -> ClimateState {
        self.state.lock().climate_state
    }

    fn target_temperature(&self) -> f64 {
        self.state.lock().target_celsius
    }

    fn temperature_unit(&self) -> TemperatureUnit {
        self.state.lock().unit
    }

    async fn write_climate_operation(&self, operation: ControlOperation) -> Result<()> {
        let mut state = self.state.lock();
        if state.reject_writes {
            return Err(RemoteError::Rejected(format!(
                "climatisation {operation} refused"
            )));
        }
        if !state.capable {
            return Err(RemoteError::Unsupported("climatisation"));
        }
        state.operation_writes.push(operation);
        let outcome = state.outcome_override.unwrap_or(RequestStatus::Successful);
        let request = PendingRequest::new(Uuid::new_v4().to_string(), operation, RequestStatus::Queued);
        debug!(target: "vdash::remote", request_id = %request.id, %operation, %outcome, "staged simulated command");
        let remaining_steps = state.steps_to_outcome;
        state.staged.push(SimRequest {
            request,
            remaining_steps,
            outcome,
            frozen: false,
        });
        Ok(())
    }

    async fn write_target_temperature(&self, value: f64) -> Result<()> {
        let mut state = self.state.lock();
        if state.reject_writes {
            return Err(RemoteError::Rejected("target temperature refused".into()));
        }
        state.temperature_writes.push(value);
        state.target_celsius = state.unit.to_celsius(value);
        Ok(())
    }

    fn pending_requests(&self) -> Vec<PendingRequest> {
        snapshot(&self.state.lock().requests)
    }

    fn subscribe_requests(&self) -> broadcast::Receiver<RequestEvent> {
        self.events.subscribe()
    }
}
