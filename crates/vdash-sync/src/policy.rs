//! ---
//! vdash_section: "07-resilience-fault-tolerance"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Remote synchronisation engine and its backoff policy."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use std::time::Duration;

use vdash_common::config::SyncConfig;
use vdash_common::time::{DayPeriod, DaySchedule};

/// Intervals and limits driving the engine.
#[derive(Debug, Clone, Copy)]
pub struct SyncPolicy {
    pub day_interval: Duration,
    pub night_interval: Duration,
    pub schedule: DaySchedule,
    pub full_refresh_interval: Duration,
    /// Pause length after a failed fetch.
    pub cooldown: Duration,
    /// Consecutive built-in skips that trigger a job restart.
    pub skip_limit: u32,
    /// Restarts that trigger a reboot.
    pub restart_limit: u32,
}

impl SyncPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            day_interval: config.day_interval,
            night_interval: config.night_interval,
            schedule: config.schedule(),
            full_refresh_interval: config.full_refresh_interval,
            cooldown: config.cooldown,
            skip_limit: config.skip_limit.max(1),
            restart_limit: config.restart_limit.max(1),
        }
    }

    pub fn main_interval(&self, period: DayPeriod) -> Duration {
        match period {
            DayPeriod::Day => self.day_interval,
            DayPeriod::Night => self.night_interval,
        }
    }
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_configuration() {
        let policy = SyncPolicy::default();
        assert_eq!(policy.main_interval(DayPeriod::Day), Duration::from_secs(60));
        assert_eq!(
            policy.main_interval(DayPeriod::Night),
            Duration::from_secs(600)
        );
        assert_eq!(policy.cooldown, Duration::from_secs(60));
        assert_eq!((policy.skip_limit, policy.restart_limit), (5, 5));
    }
}
