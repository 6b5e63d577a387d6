//! ---
//! vdash_section: "07-resilience-fault-tolerance"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Remote synchronisation engine and its backoff policy."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Local;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use vdash_remote::{Domain, RebootAction, SharedClient, SignalSink};

use crate::error::{Result, SyncError};
use crate::metrics::SyncMetrics;
use crate::policy::SyncPolicy;

/// Regular polling job. Its interval follows the day/night schedule.
pub const MAIN_JOB: &str = "main";
/// Slow job refreshing every domain including capability metadata.
pub const FULL_REFRESH_JOB: &str = "full-refresh";

/// Slack added after a day/night boundary so the clock is clearly past it.
const BOUNDARY_MARGIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
struct JobSpec {
    id: String,
    domains: Vec<Domain>,
    interval: Duration,
    silent: bool,
}

struct JobEntry {
    spec: JobSpec,
    handle: JoinHandle<()>,
}

/// Point-in-time view of a registered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub id: String,
    pub domains: Vec<Domain>,
    pub interval: Duration,
    pub silent: bool,
    pub running: bool,
}

/// Backoff and escalation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineState {
    pub paused: bool,
    pub skip_count: u32,
    pub restart_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Fetched,
    /// The same job id was still in flight; nothing was fetched.
    Skipped,
}

#[derive(Debug, Default)]
struct Counters {
    skip: u32,
    restart: u32,
}

struct Shared {
    client: SharedClient,
    sink: Arc<dyn SignalSink>,
    reboot: Arc<dyn RebootAction>,
    policy: SyncPolicy,
    metrics: Option<SyncMetrics>,
    jobs: Mutex<IndexMap<String, JobEntry>>,
    running: Mutex<HashSet<String>>,
    paused: AtomicBool,
    pause_generation: AtomicU64,
    counters: Mutex<Counters>,
    resume_timer: Mutex<Option<JoinHandle<()>>>,
    rate_switcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        for (_, entry) in self.jobs.get_mut().drain(..) {
            entry.handle.abort();
        }
        if let Some(timer) = self.resume_timer.get_mut().take() {
            timer.abort();
        }
        if let Some(switcher) = self.rate_switcher.get_mut().take() {
            switcher.abort();
        }
    }
}

/// Clears the in-flight marker of a guarded job when the update ends.
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<String>>,
    id: &'a str,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.lock().remove(self.id);
    }
}

/// Owner of every periodic poll against the remote service.
///
/// Cloning is cheap and every clone drives the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        client: SharedClient,
        sink: Arc<dyn SignalSink>,
        reboot: Arc<dyn RebootAction>,
        policy: SyncPolicy,
        metrics: Option<SyncMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                client,
                sink,
                reboot,
                policy,
                metrics,
                jobs: Mutex::new(IndexMap::new()),
                running: Mutex::new(HashSet::new()),
                paused: AtomicBool::new(false),
                pause_generation: AtomicU64::new(0),
                counters: Mutex::new(Counters::default()),
                resume_timer: Mutex::new(None),
                rate_switcher: Mutex::new(None),
            }),
        }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.shared.policy
    }

    /// Register the built-in jobs and the day/night rate switcher.
    pub fn start(&self) -> Result<()> {
        self.register(self.main_spec())?;
        self.register(self.full_refresh_spec())?;

        let weak = Arc::downgrade(&self.shared);
        let schedule = self.shared.policy.schedule;
        let switcher = tokio::spawn(async move {
            loop {
                let wait = schedule.until_next_boundary(Local::now().time()) + BOUNDARY_MARGIN;
                sleep(wait).await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                SyncEngine { shared }.apply_day_period();
            }
        });
        if let Some(previous) = self.shared.rate_switcher.lock().replace(switcher) {
            previous.abort();
        }
        info!(
            target: "vdash::sync",
            period = schedule.current_period().as_str(),
            "synchronisation engine started"
        );
        Ok(())
    }

    /// Cancel every job, the resume timer and the rate switcher.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.shared.jobs.lock().drain(..).collect();
        for (_, entry) in drained {
            entry.handle.abort();
        }
        if let Some(timer) = self.shared.resume_timer.lock().take() {
            timer.abort();
        }
        if let Some(switcher) = self.shared.rate_switcher.lock().take() {
            switcher.abort();
        }
        info!(target: "vdash::sync", "synchronisation engine stopped");
    }

    /// Register a periodic job. With `run_immediately` one guarded fetch runs
    /// before returning; the job stays registered even if that fetch fails.
    pub async fn add_job(
        &self,
        id: impl Into<String>,
        domains: Vec<Domain>,
        interval: Duration,
        silent: bool,
        run_immediately: bool,
    ) -> Result<()> {
        let spec = JobSpec {
            id: id.into(),
            domains,
            interval,
            silent,
        };
        self.register(spec.clone())?;
        if run_immediately {
            self.update(&spec.domains, spec.silent, Some(&spec.id))
                .await?;
        }
        Ok(())
    }

    pub fn remove_job(&self, id: &str) -> Result<()> {
        let entry = self
            .shared
            .jobs
            .lock()
            .shift_remove(id)
            .ok_or_else(|| SyncError::JobNotFound(id.to_owned()))?;
        entry.handle.abort();
        debug!(target: "vdash::sync", job = id, "job removed");
        Ok(())
    }

    /// Fetch `domains` from the remote service.
    ///
    /// With a `job_id` the call is guarded: if the same id is still in flight
    /// nothing is fetched and [`UpdateOutcome::Skipped`] is returned.
    pub async fn update(
        &self,
        domains: &[Domain],
        silent: bool,
        job_id: Option<&str>,
    ) -> Result<UpdateOutcome> {
        let _guard = match job_id {
            Some(id) => {
                if !self.shared.running.lock().insert(id.to_owned()) {
                    self.record_skip(id);
                    return Ok(UpdateOutcome::Skipped);
                }
                Some(RunningGuard {
                    running: &self.shared.running,
                    id,
                })
            }
            None => None,
        };

        if !silent {
            self.shared.sink.activity();
        }
        let include_capabilities = domains.contains(&Domain::All);
        let started = Instant::now();
        let result = self
            .shared
            .client
            .fetch(domains, include_capabilities)
            .await;
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_fetch(result.is_ok());
        }

        match result {
            Ok(()) => {
                self.shared.sink.idle();
                trace!(
                    target: "vdash::sync",
                    job = job_id.unwrap_or("-"),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "remote fetch complete"
                );
                self.resume_after_success();
                Ok(UpdateOutcome::Fetched)
            }
            Err(err) => {
                warn!(
                    target: "vdash::sync",
                    job = job_id.unwrap_or("-"),
                    error = %err,
                    "remote fetch failed; pausing scheduled jobs"
                );
                self.pause();
                self.shared.sink.error();
                Err(SyncError::Fetch(err))
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> EngineState {
        let counters = self.shared.counters.lock();
        EngineState {
            paused: self.is_paused(),
            skip_count: counters.skip,
            restart_count: counters.restart,
        }
    }

    pub fn jobs(&self) -> Vec<JobSnapshot> {
        let running = self.shared.running.lock().clone();
        self.shared
            .jobs
            .lock()
            .values()
            .map(|entry| JobSnapshot {
                id: entry.spec.id.clone(),
                domains: entry.spec.domains.clone(),
                interval: entry.spec.interval,
                silent: entry.spec.silent,
                running: running.contains(&entry.spec.id),
            })
            .collect()
    }

    pub fn has_job(&self, id: &str) -> bool {
        self.shared.jobs.lock().contains_key(id)
    }

    fn main_spec(&self) -> JobSpec {
        let policy = &self.shared.policy;
        JobSpec {
            id: MAIN_JOB.to_owned(),
            domains: Domain::default_set(),
            interval: policy.main_interval(policy.schedule.current_period()),
            silent: false,
        }
    }

    fn full_refresh_spec(&self) -> JobSpec {
        JobSpec {
            id: FULL_REFRESH_JOB.to_owned(),
            domains: vec![Domain::All],
            interval: self.shared.policy.full_refresh_interval,
            silent: true,
        }
    }

    fn register(&self, spec: JobSpec) -> Result<()> {
        if spec.interval.is_zero() {
            return Err(SyncError::InvalidInterval(spec.id));
        }
        let mut jobs = self.shared.jobs.lock();
        if jobs.contains_key(&spec.id) {
            return Err(SyncError::DuplicateJob(spec.id));
        }
        debug!(
            target: "vdash::sync",
            job = %spec.id,
            interval_ms = spec.interval.as_millis() as u64,
            silent = spec.silent,
            "job registered"
        );
        let handle = spawn_job(Arc::downgrade(&self.shared), spec.clone());
        jobs.insert(spec.id.clone(), JobEntry { spec, handle });
        Ok(())
    }

    /// Re-register the main job when the day period changed its interval.
    fn apply_day_period(&self) {
        let spec = self.main_spec();
        let mut jobs = self.shared.jobs.lock();
        let Some(entry) = jobs.get_mut(MAIN_JOB) else {
            return;
        };
        if entry.spec.interval == spec.interval {
            return;
        }
        info!(
            target: "vdash::sync",
            interval_secs = spec.interval.as_secs(),
            "switching main polling rate"
        );
        entry.handle.abort();
        entry.handle = spawn_job(Arc::downgrade(&self.shared), spec.clone());
        entry.spec = spec;
    }

    fn pause(&self) {
        let mut timer_slot = self.shared.resume_timer.lock();
        let generation = self.shared.pause_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.paused.store(true, Ordering::SeqCst);
        if let Some(metrics) = &self.shared.metrics {
            metrics.set_paused(true);
        }

        let weak = Arc::downgrade(&self.shared);
        let cooldown = self.shared.policy.cooldown;
        let timer = tokio::spawn(async move {
            sleep(cooldown).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let engine = SyncEngine { shared };
            let _slot = engine.shared.resume_timer.lock();
            if engine.shared.pause_generation.load(Ordering::SeqCst) == generation {
                engine.resume("cooldown elapsed");
            }
        });
        if let Some(previous) = timer_slot.replace(timer) {
            previous.abort();
        }
        debug!(
            target: "vdash::sync",
            cooldown_ms = cooldown.as_millis() as u64,
            "resume armed"
        );
    }

    /// Resume and disarm the cooldown timer as one step under the timer slot,
    /// so a concurrent `pause` can never have its fresh timer aborted.
    fn resume_after_success(&self) {
        let mut timer_slot = self.shared.resume_timer.lock();
        if self.resume("successful update") {
            if let Some(timer) = timer_slot.take() {
                timer.abort();
            }
        }
    }

    fn resume(&self, reason: &'static str) -> bool {
        if !self.shared.paused.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Some(metrics) = &self.shared.metrics {
            metrics.set_paused(false);
        }
        info!(target: "vdash::sync", reason, "resuming scheduled jobs");
        true
    }

    fn record_skip(&self, job_id: &str) {
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_skip(job_id);
        }
        if job_id != MAIN_JOB && job_id != FULL_REFRESH_JOB {
            debug!(target: "vdash::sync", job = job_id, "job still running; update skipped");
            return;
        }

        let policy = &self.shared.policy;
        let (restart, reboot) = {
            let mut counters = self.shared.counters.lock();
            counters.skip += 1;
            warn!(
                target: "vdash::sync",
                job = job_id,
                skip_count = counters.skip,
                "built-in job still running; update skipped"
            );
            if counters.skip < policy.skip_limit {
                (false, false)
            } else {
                counters.skip = 0;
                counters.restart += 1;
                if counters.restart >= policy.restart_limit {
                    counters.restart = 0;
                    (true, true)
                } else {
                    (true, false)
                }
            }
        };

        if restart {
            self.restart_builtin_jobs();
        }
        if reboot {
            error!(target: "vdash::sync", "built-in jobs keep stalling; requesting reboot");
            if let Some(metrics) = &self.shared.metrics {
                metrics.record_reboot();
            }
            self.shared.reboot.reboot();
        }
    }

    fn restart_builtin_jobs(&self) {
        warn!(target: "vdash::sync", "restarting built-in jobs");
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_restart();
        }
        for spec in [self.main_spec(), self.full_refresh_spec()] {
            if let Err(err) = self.remove_job(&spec.id) {
                debug!(target: "vdash::sync", error = %err, "built-in job was not registered");
            }
            if let Err(err) = self.register(spec) {
                error!(target: "vdash::sync", error = %err, "failed to re-register built-in job");
            }
        }
    }
}

fn spawn_job(shared: Weak<Shared>, spec: JobSpec) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + spec.interval, spec.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            let engine = SyncEngine { shared };
            if engine.is_paused() {
                trace!(target: "vdash::sync", job = %spec.id, "paused; tick ignored");
                continue;
            }
            let run = spec.clone();
            // Runs detached so a stalled fetch shows up as a skip on the next tick.
            tokio::spawn(async move {
                let _ = engine.update(&run.domains, run.silent, Some(&run.id)).await;
            });
        }
    })
}
