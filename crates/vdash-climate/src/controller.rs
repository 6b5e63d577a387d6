//! ---
//! vdash_section: "01-core-functionality"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Remote climate control and command correlation."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};
use vdash_remote::{
    ClimateState, ControlOperation, Domain, PendingRequest, RequestEvent, RequestStatus,
    SharedClient, SignalKind, SignalSink, SwitchLock,
};
use vdash_sync::{SyncEngine, SyncError};

use crate::error::{ClimateError, Result};
use crate::metrics::ClimateMetrics;
use crate::policy::ClimatePolicy;

/// Prefix of the job polling the climate domain while the issued command is searched for.
pub const FINDER_JOB: &str = "climate-request-finder";
/// Prefix of the job polling the climate domain while the correlated request is followed.
pub const TRACKER_JOB: &str = "climate-request-tracker";

/// Finder job owned by the command with `epoch`.
pub fn finder_job_id(epoch: u64) -> String {
    format!("{FINDER_JOB}-{epoch}")
}

/// Tracker job owned by the command with `epoch`.
pub fn tracker_job_id(epoch: u64) -> String {
    format!("{TRACKER_JOB}-{epoch}")
}

const NO_EPOCH: u64 = 0;

/// Whether a new command may be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinishCause {
    Status(RequestStatus),
    Deadline,
    WriteFailed,
    Abandoned,
}

impl FinishCause {
    fn label(&self, success: bool) -> &'static str {
        match self {
            FinishCause::Status(_) if success => "success",
            FinishCause::Status(_) => "failure",
            FinishCause::Deadline => "deadline",
            FinishCause::WriteFailed => "write_failed",
            FinishCause::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug)]
struct Operation {
    epoch: u64,
    target: ControlOperation,
    issued_at: Instant,
    correlated: Option<PendingRequest>,
    deadline: Option<JoinHandle<()>>,
    correlation: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct ControllerState {
    gate: Gate,
    operation: Option<Operation>,
}

struct Inner {
    client: SharedClient,
    engine: SyncEngine,
    sink: Arc<dyn SignalSink>,
    switch_lock: Arc<dyn SwitchLock>,
    policy: ClimatePolicy,
    metrics: Option<ClimateMetrics>,
    state: Mutex<ControllerState>,
    next_epoch: AtomicU64,
    /// Epoch still allowed to finish, [`NO_EPOCH`] when idle. Swapped out exactly once per command.
    live_epoch: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let epoch = self.live_epoch.load(Ordering::SeqCst);
        if epoch != NO_EPOCH {
            warn!(target: "vdash::climate", epoch, "controller dropped with a command in flight");
            self.finish(epoch, false, FinishCause::Abandoned);
        }
    }
}

/// Starts, stops and tunes remote climatisation for one vehicle.
#[derive(Clone)]
pub struct ClimateController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ClimateController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClimateController")
            .field("gate", &self.gate())
            .field("epoch", &self.current_epoch())
            .finish_non_exhaustive()
    }
}

impl ClimateController {
    /// Fails with [`ClimateError::Compatibility`] when the vehicle lacks remote climatisation.
    pub fn new(
        client: SharedClient,
        engine: SyncEngine,
        sink: Arc<dyn SignalSink>,
        switch_lock: Arc<dyn SwitchLock>,
        policy: ClimatePolicy,
        metrics: Option<ClimateMetrics>,
    ) -> Result<Self> {
        if !client.climate_control_capable() {
            let vin = client.vehicle().vin;
            warn!(target: "vdash::climate", %vin, "vehicle lacks remote climatisation");
            return Err(ClimateError::Compatibility { vin });
        }
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                engine,
                sink,
                switch_lock,
                policy,
                metrics,
                state: Mutex::new(ControllerState {
                    gate: Gate::Available,
                    operation: None,
                }),
                next_epoch: AtomicU64::new(NO_EPOCH),
                live_epoch: AtomicU64::new(NO_EPOCH),
            }),
        })
    }

    /// Issue a start command. Returns the epoch of the new command.
    pub async fn start(&self) -> Result<u64> {
        self.post_command(ControlOperation::Start).await
    }

    /// Issue a stop command. Returns the epoch of the new command.
    pub async fn stop(&self) -> Result<u64> {
        self.post_command(ControlOperation::Stop).await
    }

    /// Refresh the climate state, then start when off and stop otherwise.
    pub async fn switch(&self) -> Result<u64> {
        self.refresh().await?;
        if self.inner.client.climate_state().is_off() {
            self.start().await
        } else {
            self.stop().await
        }
    }

    /// Write the target temperature. Values outside the policy range are
    /// rejected without touching the remote service.
    pub async fn set_temperature(&self, celsius: f64) -> Result<()> {
        let policy = &self.inner.policy;
        if !policy.accepts(celsius) {
            return Err(ClimateError::OutOfRange {
                value: celsius,
                min: policy.min_temperature,
                max: policy.max_temperature,
            });
        }
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_command("set_temperature");
        }
        let unit = self.inner.client.temperature_unit();
        let value = unit.convert_celsius(celsius);
        match self.inner.client.write_target_temperature(value).await {
            Ok(()) => {
                info!(target: "vdash::climate", celsius, ?unit, "target temperature set");
                self.inner.sink.success(SignalKind::TargetTemperature);
                Ok(())
            }
            Err(err) => {
                warn!(target: "vdash::climate", celsius, error = %err, "target temperature write failed");
                self.inner.sink.failure(SignalKind::TargetTemperature);
                Err(ClimateError::SetTemperature(err))
            }
        }
    }

    pub fn gate(&self) -> Gate {
        self.inner.state.lock().gate
    }

    pub fn current_epoch(&self) -> Option<u64> {
        self.inner
            .state
            .lock()
            .operation
            .as_ref()
            .map(|operation| operation.epoch)
    }

    pub fn correlated_request(&self) -> Option<PendingRequest> {
        self.inner
            .state
            .lock()
            .operation
            .as_ref()
            .and_then(|operation| operation.correlated.clone())
    }

    pub fn climate_state(&self) -> ClimateState {
        self.inner.client.climate_state()
    }

    /// Target temperature in Celsius as last read from the vehicle.
    pub fn target_temperature(&self) -> f64 {
        self.inner.client.target_temperature()
    }

    async fn refresh(&self) -> Result<()> {
        self.inner
            .engine
            .update(&[Domain::Climatisation], false, None)
            .await?;
        Ok(())
    }

    async fn post_command(&self, target: ControlOperation) -> Result<u64> {
        if self.gate() == Gate::Unavailable {
            return Err(ClimateError::OperationAlreadyRunning);
        }

        self.refresh().await?;
        let current = self.inner.client.climate_state();
        if target.is_satisfied_by(current) {
            return Err(ClimateError::AlreadyInRequestedState(current));
        }

        let epoch = {
            let mut state = self.inner.state.lock();
            if state.gate == Gate::Unavailable {
                return Err(ClimateError::OperationAlreadyRunning);
            }
            let epoch = self.inner.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
            state.gate = Gate::Unavailable;
            state.operation = Some(Operation {
                epoch,
                target,
                issued_at: Instant::now(),
                correlated: None,
                deadline: None,
                correlation: None,
            });
            self.inner.live_epoch.store(epoch, Ordering::SeqCst);
            self.inner.switch_lock.disable();
            epoch
        };
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_command(target.as_str());
        }

        let events = self.inner.client.subscribe_requests();

        if let Err(err) = self.inner.client.write_climate_operation(target).await {
            warn!(target: "vdash::climate", epoch, operation = %target, error = %err, "climate command write failed");
            self.inner.finish(epoch, false, FinishCause::WriteFailed);
            return Err(ClimateError::CommandWrite(err));
        }
        info!(target: "vdash::climate", epoch, operation = %target, "climate command sent");

        if let Err(err) = self
            .inner
            .engine
            .add_job(
                finder_job_id(epoch),
                vec![Domain::Climatisation],
                self.inner.policy.finder_interval,
                false,
                false,
            )
            .await
        {
            warn!(target: "vdash::climate", epoch, error = %err, "failed to register request finder job");
        }

        let weak = Arc::downgrade(&self.inner);
        let deadline = self.inner.policy.deadline;
        let deadline_task = tokio::spawn({
            let weak = weak.clone();
            async move {
                sleep(deadline).await;
                if let Some(inner) = weak.upgrade() {
                    if inner.is_live(epoch) {
                        warn!(
                            target: "vdash::climate",
                            epoch,
                            deadline_secs = deadline.as_secs(),
                            "no outcome before deadline; command may still take effect"
                        );
                    }
                    inner.finish(epoch, false, FinishCause::Deadline);
                }
            }
        });
        let correlation_task = tokio::spawn(correlate(weak, epoch, target, events));

        let mut state = self.inner.state.lock();
        match state
            .operation
            .as_mut()
            .filter(|operation| operation.epoch == epoch)
        {
            Some(operation) => {
                operation.deadline = Some(deadline_task);
                operation.correlation = Some(correlation_task);
            }
            None => {
                deadline_task.abort();
                correlation_task.abort();
            }
        }
        Ok(epoch)
    }
}

impl Inner {
    fn is_live(&self, epoch: u64) -> bool {
        self.live_epoch.load(Ordering::SeqCst) == epoch
    }

    /// Settle `epoch`. Only the first caller for a live epoch has any effect.
    fn finish(&self, epoch: u64, success: bool, cause: FinishCause) -> bool {
        if self
            .live_epoch
            .compare_exchange(epoch, NO_EPOCH, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(target: "vdash::climate", epoch, ?cause, "finish ignored for settled epoch");
            return false;
        }

        let operation = self.state.lock().operation.take();
        self.remove_tracking_jobs(epoch);
        self.switch_lock.enable();
        if let Some(operation) = operation {
            let target = operation.target;
            let elapsed = operation.issued_at.elapsed();
            abort_tasks(operation);

            let kind = match target {
                ControlOperation::Start => SignalKind::ClimateStart,
                ControlOperation::Stop => SignalKind::ClimateStop,
            };
            if success {
                self.sink.success(kind);
            } else {
                self.sink.failure(kind);
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_outcome(target.as_str(), cause.label(success), elapsed);
            }
            info!(
                target: "vdash::climate",
                epoch,
                operation = %target,
                success,
                ?cause,
                elapsed_ms = elapsed.as_millis() as u64,
                "climate command settled"
            );
        }
        // Observers of `Available` must already see the outcome.
        self.state.lock().gate = Gate::Available;
        true
    }

    /// Record the request produced by `epoch` and swap the finder job for the tracker.
    async fn track(&self, epoch: u64, request: &PendingRequest) -> bool {
        {
            let mut state = self.state.lock();
            match state
                .operation
                .as_mut()
                .filter(|operation| operation.epoch == epoch)
            {
                Some(operation) => operation.correlated = Some(request.clone()),
                None => return false,
            }
        }
        info!(target: "vdash::climate", epoch, request_id = %request.id, status = %request.status, "climate command correlated");

        ignore_missing(self.engine.remove_job(&finder_job_id(epoch)));
        if let Err(err) = self
            .engine
            .add_job(
                tracker_job_id(epoch),
                vec![Domain::Climatisation],
                self.policy.tracker_interval,
                true,
                false,
            )
            .await
        {
            warn!(target: "vdash::climate", epoch, error = %err, "failed to register request tracker job");
        }
        if !self.is_live(epoch) {
            // Settled while the tracker was being registered.
            ignore_missing(self.engine.remove_job(&tracker_job_id(epoch)));
            return false;
        }
        true
    }

    fn remove_tracking_jobs(&self, epoch: u64) {
        ignore_missing(self.engine.remove_job(&finder_job_id(epoch)));
        ignore_missing(self.engine.remove_job(&tracker_job_id(epoch)));
    }
}

fn abort_tasks(operation: Operation) {
    if let Some(task) = operation.deadline {
        task.abort();
    }
    if let Some(task) = operation.correlation {
        task.abort();
    }
}

fn ignore_missing(result: std::result::Result<(), SyncError>) {
    match result {
        Ok(()) | Err(SyncError::JobNotFound(_)) => {}
        Err(err) => warn!(target: "vdash::climate", error = %err, "failed to remove tracking job"),
    }
}

/// Follow request notifications for `epoch` until its outcome is known.
async fn correlate(
    inner: Weak<Inner>,
    epoch: u64,
    target: ControlOperation,
    mut events: Receiver<RequestEvent>,
) {
    let mut tracked: Option<String> = None;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                debug!(target: "vdash::climate", epoch, missed, "request notifications lagged; rescanning");
                RequestEvent::CollectionChanged(inner.client.pending_requests())
            }
            Err(RecvError::Closed) => {
                warn!(target: "vdash::climate", epoch, "request notifications closed; waiting for deadline");
                return;
            }
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.is_live(epoch) {
            return;
        }

        match &tracked {
            None => {
                let RequestEvent::CollectionChanged(requests) = event else {
                    continue;
                };
                let mut candidates = requests
                    .into_iter()
                    .filter(|request| request.status.is_ongoing() && request.operation == target);
                let (Some(request), None) = (candidates.next(), candidates.next()) else {
                    trace!(target: "vdash::climate", epoch, "no unique pending request yet");
                    continue;
                };
                if !inner.track(epoch, &request).await {
                    return;
                }
                tracked = Some(request.id);
            }
            Some(id) => {
                let status = match event {
                    RequestEvent::StatusChanged(request) if &request.id == id => request.status,
                    RequestEvent::CollectionChanged(requests) => {
                        match requests.into_iter().find(|request| &request.id == id) {
                            Some(request) => request.status,
                            None => continue,
                        }
                    }
                    RequestEvent::StatusChanged(_) => continue,
                };
                if status.is_success() {
                    inner.finish(epoch, true, FinishCause::Status(status));
                    return;
                }
                if status.is_failure() {
                    warn!(target: "vdash::climate", epoch, request_id = %id, %status, "climate command failed remotely");
                    inner.finish(epoch, false, FinishCause::Status(status));
                    return;
                }
                trace!(target: "vdash::climate", epoch, %status, "tracked request still pending");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vdash_remote::{
        RecordingReboot, RecordingSignalSink, Signal, SimulatedVehicle, VehicleInfo,
        VehicleSwitchGate,
    };
    use vdash_sync::SyncPolicy;

    struct Fixture {
        sim: Arc<SimulatedVehicle>,
        sink: Arc<RecordingSignalSink>,
        gate: Arc<VehicleSwitchGate>,
        controller: ClimateController,
    }

    fn fixture() -> Fixture {
        let sim = Arc::new(SimulatedVehicle::new(VehicleInfo {
            vin: "WVWZZZUNIT0000002".into(),
            nickname: None,
        }));
        sim.set_steps_to_outcome(u32::MAX);
        let client: SharedClient = sim.clone();
        let sink = Arc::new(RecordingSignalSink::new());
        let gate = Arc::new(VehicleSwitchGate::new());
        let engine = SyncEngine::new(
            client.clone(),
            sink.clone(),
            Arc::new(RecordingReboot::new()),
            SyncPolicy::default(),
            None,
        );
        let policy = ClimatePolicy {
            deadline: Duration::from_secs(60),
            ..ClimatePolicy::default()
        };
        let controller =
            ClimateController::new(client, engine, sink.clone(), gate.clone(), policy, None)
                .unwrap();
        Fixture {
            sim,
            sink,
            gate,
            controller,
        }
    }

    #[tokio::test]
    async fn finish_is_idempotent_per_epoch() {
        let f = fixture();
        let epoch = f.controller.start().await.unwrap();
        assert!(f.controller.inner.finish(epoch, true, FinishCause::Status(RequestStatus::Successful)));
        assert!(!f.controller.inner.finish(epoch, false, FinishCause::Deadline));

        assert_eq!(f.controller.gate(), Gate::Available);
        assert_eq!(f.gate.enable_count(), 1);
        assert_eq!(f.sink.count(Signal::Success(SignalKind::ClimateStart)), 1);
        assert_eq!(f.sink.count(Signal::Failure(SignalKind::ClimateStart)), 0);
    }

    #[tokio::test]
    async fn stale_deadline_leaves_next_command_alone() {
        let f = fixture();
        let first = f.controller.start().await.unwrap();
        assert!(f.controller.inner.finish(first, true, FinishCause::Status(RequestStatus::Successful)));

        f.sim.set_climate_state(ClimateState::Off);
        let second = f.controller.start().await.unwrap();
        assert!(second > first);

        assert!(!f.controller.inner.finish(first, false, FinishCause::Deadline));
        assert_eq!(f.controller.gate(), Gate::Unavailable);
        assert_eq!(f.controller.current_epoch(), Some(second));
        assert_eq!(f.gate.enable_count(), 1);
        assert!(!f.gate.is_change_allowed());
        assert!(f.controller.inner.engine.has_job(&finder_job_id(second)));
        assert!(!f.controller.inner.engine.has_job(&finder_job_id(first)));
    }

    #[tokio::test]
    async fn dropping_controller_removes_tracking_jobs() {
        let f = fixture();
        let epoch = f.controller.start().await.unwrap();
        let engine = f.controller.inner.engine.clone();
        assert!(engine.has_job(&finder_job_id(epoch)));
        drop(f);
        assert!(!engine.has_job(&finder_job_id(epoch)));
    }

    #[tokio::test]
    async fn dropping_controller_mid_command_releases_switch_lock() {
        let Fixture {
            sink,
            gate,
            controller,
            ..
        } = fixture();
        controller.start().await.unwrap();
        assert!(!gate.is_change_allowed());

        drop(controller);
        assert_eq!((gate.disable_count(), gate.enable_count()), (1, 1));
        assert!(gate.is_change_allowed());
        assert_eq!(sink.count(Signal::Failure(SignalKind::ClimateStart)), 1);
    }

    #[tokio::test]
    async fn stale_tracker_cleanup_spares_newer_command() {
        let f = fixture();
        let first = f.controller.start().await.unwrap();
        let engine = f.controller.inner.engine.clone();
        engine
            .add_job(
                tracker_job_id(first + 1),
                vec![Domain::Climatisation],
                Duration::from_secs(60),
                true,
                false,
            )
            .await
            .unwrap();

        assert!(f.controller.inner.finish(first, false, FinishCause::Deadline));
        assert!(!engine.has_job(&finder_job_id(first)));
        assert!(engine.has_job(&tracker_job_id(first + 1)));

        let request = PendingRequest::new("late", ControlOperation::Start, RequestStatus::Queued);
        assert!(!f.controller.inner.track(first, &request).await);
        assert!(engine.has_job(&tracker_job_id(first + 1)));
    }
}
