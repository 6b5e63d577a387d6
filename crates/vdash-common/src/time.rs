//! ---
//! vdash_section: "01-core-functionality"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Shared primitives and utilities for the dashboard runtime."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{Local, NaiveTime};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Part of the day used to pick the polling rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DayPeriod {
    Day,
    Night,
}

impl DayPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayPeriod::Day => "day",
            DayPeriod::Night => "night",
        }
    }
}

/// Wall-clock boundaries between the daytime and nighttime polling rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaySchedule {
    pub daytime_start: NaiveTime,
    pub nighttime_start: NaiveTime,
}

impl DaySchedule {
    pub fn new(daytime_start: NaiveTime, nighttime_start: NaiveTime) -> Self {
        Self {
            daytime_start,
            nighttime_start,
        }
    }

    /// Classify a local time of day. Both boundaries are inclusive on the day side.
    pub fn period_at(&self, at: NaiveTime) -> DayPeriod {
        let is_day = if self.daytime_start <= self.nighttime_start {
            self.daytime_start <= at && at <= self.nighttime_start
        } else {
            at >= self.daytime_start || at <= self.nighttime_start
        };
        if is_day {
            DayPeriod::Day
        } else {
            DayPeriod::Night
        }
    }

    pub fn current_period(&self) -> DayPeriod {
        self.period_at(Local::now().time())
    }

    /// Time left until the next boundary strictly after `at`.
    pub fn until_next_boundary(&self, at: NaiveTime) -> Duration {
        let next = [self.daytime_start, self.nighttime_start]
            .iter()
            .map(|boundary| {
                let delta = boundary
                    .signed_duration_since(at)
                    .num_milliseconds()
                    .rem_euclid(MILLIS_PER_DAY);
                if delta == 0 {
                    MILLIS_PER_DAY
                } else {
                    delta
                }
            })
            .min()
            .unwrap_or(MILLIS_PER_DAY);
        Duration::from_millis(next as u64)
    }
}

impl Default for DaySchedule {
    fn default() -> Self {
        Self {
            daytime_start: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
            nighttime_start: NaiveTime::from_hms_opt(23, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn classifies_default_schedule() {
        let schedule = DaySchedule::default();
        assert_eq!(schedule.period_at(at(6, 59, 59)), DayPeriod::Night);
        assert_eq!(schedule.period_at(at(7, 0, 0)), DayPeriod::Day);
        assert_eq!(schedule.period_at(at(12, 30, 0)), DayPeriod::Day);
        assert_eq!(schedule.period_at(at(23, 0, 1)), DayPeriod::Night);
        assert_eq!(schedule.period_at(at(2, 0, 0)), DayPeriod::Night);
    }

    #[test]
    fn classifies_wrapping_schedule() {
        let schedule = DaySchedule::new(at(20, 0, 0), at(4, 0, 0));
        assert_eq!(schedule.period_at(at(22, 0, 0)), DayPeriod::Day);
        assert_eq!(schedule.period_at(at(3, 0, 0)), DayPeriod::Day);
        assert_eq!(schedule.period_at(at(12, 0, 0)), DayPeriod::Night);
    }

    #[test]
    fn next_boundary_wraps_midnight() {
        let schedule = DaySchedule::default();
        assert_eq!(
            schedule.until_next_boundary(at(22, 0, 0)),
            Duration::from_secs(3600)
        );
        assert_eq!(
            schedule.until_next_boundary(at(23, 30, 0)),
            Duration::from_secs(7 * 3600 + 1800)
        );
        assert_eq!(
            schedule.until_next_boundary(at(7, 0, 0)),
            Duration::from_secs(16 * 3600)
        );
    }
}
