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

use vdash_common::config::ClimateConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimatePolicy {
    /// Upper bound on waiting for a command outcome.
    pub deadline: Duration,
    /// Poll interval while looking for the request a command produced.
    pub finder_interval: Duration,
    /// Poll interval while following the correlated request.
    pub tracker_interval: Duration,
    pub min_temperature: f64,
    pub max_temperature: f64,
}

impl ClimatePolicy {
    pub fn from_config(config: &ClimateConfig) -> Self {
        Self {
            deadline: config.deadline,
            finder_interval: config.finder_interval,
            tracker_interval: config.tracker_interval,
            min_temperature: config.min_temperature,
            max_temperature: config.max_temperature,
        }
    }

    pub fn accepts(&self, celsius: f64) -> bool {
        (self.min_temperature..=self.max_temperature).contains(&celsius)
    }
}

impl Default for ClimatePolicy {
    fn default() -> Self {
        Self::from_config(&ClimateConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_inclusive() {
        let policy = ClimatePolicy::default();
        assert!(policy.accepts(15.5));
        assert!(policy.accepts(30.0));
        assert!(!policy.accepts(15.49));
        assert!(!policy.accepts(30.01));
        assert!(!policy.accepts(f64::NAN));
        assert_eq!(policy.deadline, Duration::from_secs(300));
    }
}
