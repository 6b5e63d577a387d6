//! ---
//! vdash_section: "07-resilience-fault-tolerance"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Remote synchronisation engine and its backoff policy."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use anyhow::Result;
use vdash_metrics::prometheus::{IntCounter, IntCounterVec, IntGauge, Opts};
use vdash_metrics::SharedRegistry;

/// Metrics published by the synchronisation engine.
#[derive(Clone)]
pub struct SyncMetrics {
    fetches_total: IntCounterVec,
    skips_total: IntCounterVec,
    restarts_total: IntCounter,
    reboots_total: IntCounter,
    paused: IntGauge,
}

impl SyncMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let fetches_total = IntCounterVec::new(
            Opts::new(
                "vdash_sync_fetches_total",
                "Remote fetches performed by the synchronisation engine",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(fetches_total.clone()))?;

        let skips_total = IntCounterVec::new(
            Opts::new(
                "vdash_sync_skips_total",
                "Scheduled updates skipped because the previous run was still in flight",
            ),
            &["job"],
        )?;
        registry.register(Box::new(skips_total.clone()))?;

        let restarts_total = IntCounter::with_opts(Opts::new(
            "vdash_sync_restarts_total",
            "Restarts of the built-in polling jobs",
        ))?;
        registry.register(Box::new(restarts_total.clone()))?;

        let reboots_total = IntCounter::with_opts(Opts::new(
            "vdash_sync_reboots_total",
            "Reboots requested by the escalation policy",
        ))?;
        registry.register(Box::new(reboots_total.clone()))?;

        let paused = IntGauge::with_opts(Opts::new(
            "vdash_sync_paused",
            "1 while scheduled polling is paused after a failed fetch",
        ))?;
        registry.register(Box::new(paused.clone()))?;

        Ok(Self {
            fetches_total,
            skips_total,
            restarts_total,
            reboots_total,
            paused,
        })
    }

    pub fn record_fetch(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.fetches_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_skip(&self, job: &str) {
        self.skips_total.with_label_values(&[job]).inc();
    }

    pub fn record_restart(&self) {
        self.restarts_total.inc();
    }

    pub fn record_reboot(&self) {
        self.reboots_total.inc();
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.set(i64::from(paused));
    }
}

impl std::fmt::Debug for SyncMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMetrics").finish_non_exhaustive()
    }
}
