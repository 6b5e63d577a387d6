//! ---
//! vdash_section: "01-core-functionality"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Remote climate control and command correlation."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::Result;
use vdash_metrics::prometheus::{self, HistogramOpts, HistogramVec, IntCounterVec, Opts};
use vdash_metrics::SharedRegistry;

/// Metrics published by the climate controller.
#[derive(Clone)]
pub struct ClimateMetrics {
    commands_total: IntCounterVec,
    outcomes_total: IntCounterVec,
    correlation_seconds: HistogramVec,
}

impl ClimateMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let commands_total = IntCounterVec::new(
            Opts::new(
                "vdash_climate_commands_total",
                "Climate commands accepted for issuance",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let outcomes_total = IntCounterVec::new(
            Opts::new(
                "vdash_climate_outcomes_total",
                "Settled climate commands by outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(outcomes_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "vdash_climate_correlation_seconds",
            "Time from issuing a climate command until its outcome was known",
        )
        .buckets(prometheus::exponential_buckets(0.5, 2.0, 12)?);
        let correlation_seconds = HistogramVec::new(histogram_opts, &["operation"])?;
        registry.register(Box::new(correlation_seconds.clone()))?;

        Ok(Self {
            commands_total,
            outcomes_total,
            correlation_seconds,
        })
    }

    pub fn record_command(&self, operation: &str) {
        self.commands_total.with_label_values(&[operation]).inc();
    }

    pub fn record_outcome(&self, operation: &str, outcome: &str, elapsed: Duration) {
        self.outcomes_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.correlation_seconds
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }
}

impl std::fmt::Debug for ClimateMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClimateMetrics").finish_non_exhaustive()
    }
}
