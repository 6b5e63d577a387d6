//! ---
//! vdash_section: "15-testing-qa-runbook"
//! vdash_subsection: "integration-tests"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Climate command issuance, correlation and settlement."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use vdash_climate::{
    finder_job_id, tracker_job_id, ClimateController, ClimateError, ClimateMetrics, ClimatePolicy,
    Gate,
};
use vdash_common::time::DaySchedule;
use vdash_remote::{
    ClimateState, ControlOperation, RecordingReboot, RecordingSignalSink, RequestStatus,
    SharedClient, Signal, SignalKind, SimulatedVehicle, TemperatureUnit, VehicleInfo,
    VehicleSwitchGate,
};
use vdash_sync::{SyncEngine, SyncPolicy};

const LONG: Duration = Duration::from_secs(3600);

struct Harness {
    sim: Arc<SimulatedVehicle>,
    sink: Arc<RecordingSignalSink>,
    gate: Arc<VehicleSwitchGate>,
    engine: SyncEngine,
    controller: ClimateController,
}

fn climate_policy(deadline: Duration) -> ClimatePolicy {
    ClimatePolicy {
        deadline,
        finder_interval: Duration::from_millis(20),
        tracker_interval: Duration::from_millis(20),
        ..ClimatePolicy::default()
    }
}

fn vehicle() -> Arc<SimulatedVehicle> {
    Arc::new(SimulatedVehicle::new(VehicleInfo {
        vin: "WVWZZZCLIM0000001".into(),
        nickname: Some("e-Golf".into()),
    }))
}

fn engine_for(sim: &Arc<SimulatedVehicle>, sink: Arc<RecordingSignalSink>) -> SyncEngine {
    let client: SharedClient = sim.clone();
    SyncEngine::new(
        client,
        sink,
        Arc::new(RecordingReboot::new()),
        SyncPolicy {
            day_interval: LONG,
            night_interval: LONG,
            schedule: DaySchedule::default(),
            full_refresh_interval: LONG,
            cooldown: LONG,
            skip_limit: 5,
            restart_limit: 5,
        },
        None,
    )
}

fn harness_with(sim: Arc<SimulatedVehicle>, policy: ClimatePolicy) -> Harness {
    let sink = Arc::new(RecordingSignalSink::new());
    let gate = Arc::new(VehicleSwitchGate::new());
    let engine = engine_for(&sim, sink.clone());
    let client: SharedClient = sim.clone();
    let controller = ClimateController::new(
        client,
        engine.clone(),
        sink.clone(),
        gate.clone(),
        policy,
        None,
    )
    .expect("climate-capable vehicle");
    Harness {
        sim,
        sink,
        gate,
        engine,
        controller,
    }
}

fn harness() -> Harness {
    harness_with(vehicle(), climate_policy(Duration::from_secs(5)))
}

async fn wait_until_settled(controller: &ClimateController) {
    timeout(Duration::from_secs(3), async {
        while controller.gate() == Gate::Unavailable {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("climate command did not settle in time");
}

async fn wait_until_correlated(controller: &ClimateController) -> vdash_remote::PendingRequest {
    timeout(Duration::from_secs(3), async {
        loop {
            if let Some(request) = controller.correlated_request() {
                return request;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("climate command was not correlated in time")
}

#[tokio::test]
async fn incompatible_vehicle_is_refused() {
    let sim = vehicle();
    sim.set_climate_capable(false);
    let sink = Arc::new(RecordingSignalSink::new());
    let engine = engine_for(&sim, sink.clone());
    let client: SharedClient = sim.clone();
    let err = ClimateController::new(
        client,
        engine,
        sink,
        Arc::new(VehicleSwitchGate::new()),
        ClimatePolicy::default(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, ClimateError::Compatibility { vin } if vin == "WVWZZZCLIM0000001"));
}

#[tokio::test]
async fn out_of_range_temperature_is_never_written() {
    let h = harness();
    for value in [15.4, 30.1, f64::NAN] {
        let err = h.controller.set_temperature(value).await.unwrap_err();
        assert!(matches!(err, ClimateError::OutOfRange { .. }));
    }
    assert!(h.sim.temperature_writes().is_empty());

    h.controller.set_temperature(15.5).await.unwrap();
    h.controller.set_temperature(30.0).await.unwrap();
    assert_eq!(h.sim.temperature_writes(), vec![15.5, 30.0]);
    assert_eq!(h.sink.count(Signal::Success(SignalKind::TargetTemperature)), 2);
}

#[tokio::test]
async fn kelvin_vehicle_receives_converted_value() {
    let h = harness();
    h.sim.set_temperature_unit(TemperatureUnit::Kelvin);
    h.controller.set_temperature(21.0).await.unwrap();

    let writes = h.sim.temperature_writes();
    assert_eq!(writes.len(), 1);
    assert!((writes[0] - 294.15).abs() < 1e-9);
    assert!((h.controller.target_temperature() - 21.0).abs() < 1e-9);
}

#[tokio::test]
async fn rejected_temperature_write_signals_failure() {
    let h = harness();
    h.sim.reject_writes(true);
    let err = h.controller.set_temperature(22.0).await.unwrap_err();
    assert!(matches!(err, ClimateError::SetTemperature(_)));
    assert_eq!(h.sink.count(Signal::Failure(SignalKind::TargetTemperature)), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_settles_on_successful_request() {
    let sim = vehicle();
    let sink = Arc::new(RecordingSignalSink::new());
    let gate = Arc::new(VehicleSwitchGate::new());
    let engine = engine_for(&sim, sink.clone());
    let registry = vdash_metrics::new_registry();
    let metrics = ClimateMetrics::new(registry.clone()).unwrap();
    let client: SharedClient = sim.clone();
    let controller = ClimateController::new(
        client,
        engine.clone(),
        sink.clone(),
        gate.clone(),
        climate_policy(Duration::from_secs(5)),
        Some(metrics),
    )
    .unwrap();

    let epoch = controller.start().await.unwrap();
    assert_eq!(controller.gate(), Gate::Unavailable);
    assert!(!gate.is_change_allowed());
    assert!(engine.has_job(&finder_job_id(epoch)));

    wait_until_settled(&controller).await;
    assert_eq!(sink.count(Signal::Success(SignalKind::ClimateStart)), 1);
    assert_eq!(sink.count(Signal::Failure(SignalKind::ClimateStart)), 0);
    assert_eq!((gate.disable_count(), gate.enable_count()), (1, 1));
    assert!(gate.is_change_allowed());
    assert!(!engine.has_job(&finder_job_id(epoch)));
    assert!(!engine.has_job(&tracker_job_id(epoch)));
    assert_eq!(controller.climate_state(), ClimateState::Heating);
    assert_eq!(controller.current_epoch(), None);

    let families = registry.gather();
    let outcomes = families
        .iter()
        .find(|family| family.get_name() == "vdash_climate_outcomes_total")
        .expect("outcome counter registered");
    assert_eq!(outcomes.get_metric()[0].get_counter().get_value(), 1.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_command_is_refused_while_first_is_pending() {
    let h = harness();
    h.sim.set_steps_to_outcome(1000);
    h.controller.start().await.unwrap();

    assert!(matches!(
        h.controller.start().await,
        Err(ClimateError::OperationAlreadyRunning)
    ));
    assert!(matches!(
        h.controller.stop().await,
        Err(ClimateError::OperationAlreadyRunning)
    ));
    assert_eq!(h.sim.operation_writes(), vec![ControlOperation::Start]);
    assert_eq!(h.gate.disable_count(), 1);
}

#[tokio::test]
async fn command_matching_current_state_is_refused() {
    let h = harness();
    let err = h.controller.stop().await.unwrap_err();
    assert!(matches!(err, ClimateError::AlreadyInRequestedState(ClimateState::Off)));

    h.sim.set_climate_state(ClimateState::Heating);
    let err = h.controller.start().await.unwrap_err();
    assert!(matches!(
        err,
        ClimateError::AlreadyInRequestedState(ClimateState::Heating)
    ));

    assert!(h.sim.operation_writes().is_empty());
    assert_eq!(h.controller.gate(), Gate::Available);
    assert_eq!(h.gate.disable_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_request_signals_failure() {
    let h = harness();
    h.sim.set_outcome(Some(RequestStatus::FailBatteryLow));
    h.controller.start().await.unwrap();
    wait_until_settled(&h.controller).await;

    assert_eq!(h.sink.count(Signal::Failure(SignalKind::ClimateStart)), 1);
    assert_eq!(h.sink.count(Signal::Success(SignalKind::ClimateStart)), 0);
    assert_eq!(h.controller.climate_state(), ClimateState::Off);
    assert_eq!(h.gate.enable_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deadline_settles_command_as_failure() {
    let h = harness_with(vehicle(), climate_policy(Duration::from_millis(300)));
    h.sim.set_steps_to_outcome(u32::MAX);
    let epoch = h.controller.start().await.unwrap();
    let request = wait_until_correlated(&h.controller).await;
    assert_eq!(request.operation, ControlOperation::Start);
    assert!(h.engine.has_job(&tracker_job_id(epoch)));

    wait_until_settled(&h.controller).await;
    assert_eq!(h.sink.count(Signal::Failure(SignalKind::ClimateStart)), 1);
    assert!(h.engine.jobs().is_empty());
    assert_eq!(h.gate.enable_count(), 1);

    // Later status changes for the abandoned request change nothing.
    h.sim.set_request_status(&request.id, RequestStatus::Successful);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.sink.count(Signal::Success(SignalKind::ClimateStart)), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_ignores_pending_stop_request() {
    let h = harness();
    h.sim.set_steps_to_outcome(u32::MAX);
    let stop_id = h
        .sim
        .inject_request(ControlOperation::Stop, RequestStatus::InProgress);

    h.controller.start().await.unwrap();
    let request = wait_until_correlated(&h.controller).await;
    assert_ne!(request.id, stop_id);
    assert_eq!(request.operation, ControlOperation::Start);

    h.sim.set_request_status(&stop_id, RequestStatus::Successful);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.controller.gate(), Gate::Unavailable);

    h.sim.set_request_status(&request.id, RequestStatus::Successful);
    wait_until_settled(&h.controller).await;
    assert_eq!(h.sink.count(Signal::Success(SignalKind::ClimateStart)), 1);
}

#[tokio::test]
async fn rejected_command_write_releases_gate() {
    let h = harness();
    h.sim.reject_writes(true);
    let err = h.controller.start().await.unwrap_err();
    assert!(matches!(err, ClimateError::CommandWrite(_)));

    assert_eq!(h.controller.gate(), Gate::Available);
    assert_eq!((h.gate.disable_count(), h.gate.enable_count()), (1, 1));
    assert_eq!(h.sink.count(Signal::Failure(SignalKind::ClimateStart)), 1);
    assert!(h.engine.jobs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn switch_toggles_between_start_and_stop() {
    let h = harness();
    h.controller.switch().await.unwrap();
    wait_until_settled(&h.controller).await;
    assert_eq!(h.controller.climate_state(), ClimateState::Heating);

    h.controller.switch().await.unwrap();
    wait_until_settled(&h.controller).await;
    assert_eq!(h.controller.climate_state(), ClimateState::Off);

    assert_eq!(
        h.sim.operation_writes(),
        vec![ControlOperation::Start, ControlOperation::Stop]
    );
    assert_eq!(h.sink.count(Signal::Success(SignalKind::ClimateStop)), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ambiguous_candidates_delay_correlation() {
    let h = harness();
    h.sim.set_steps_to_outcome(u32::MAX);
    let other = h
        .sim
        .inject_request(ControlOperation::Start, RequestStatus::Queued);

    let epoch = h.controller.start().await.unwrap();
    sleep(Duration::from_millis(150)).await;
    assert!(h.controller.correlated_request().is_none());
    assert!(h.engine.has_job(&finder_job_id(epoch)));

    h.sim.set_request_status(&other, RequestStatus::Fail);
    h.sim.publish_collection();
    let request = wait_until_correlated(&h.controller).await;
    assert_ne!(request.id, other);
    assert!(!h.engine.has_job(&finder_job_id(epoch)));
    assert!(h.engine.has_job(&tracker_job_id(epoch)));
}
