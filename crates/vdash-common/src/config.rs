//! ---
//! vdash_section: "01-core-functionality"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Shared primitives and utilities for the dashboard runtime."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;
use crate::time::DaySchedule;

/// Climate state names accepted by `simulation.initial_climate_state`.
pub const CLIMATE_STATE_NAMES: &[&str] = &["off", "heating", "cooling", "ventilation", "unknown"];

fn default_vin() -> String {
    "WVWZZZ00000000000".to_owned()
}

fn default_day_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_night_interval() -> Duration {
    Duration::from_secs(600)
}

fn default_daytime_start() -> NaiveTime {
    DaySchedule::default().daytime_start
}

fn default_nighttime_start() -> NaiveTime {
    DaySchedule::default().nighttime_start
}

fn default_full_refresh_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_cooldown() -> Duration {
    Duration::from_secs(60)
}

fn default_skip_limit() -> u32 {
    5
}

fn default_restart_limit() -> u32 {
    5
}

fn default_deadline() -> Duration {
    Duration::from_secs(300)
}

fn default_finder_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_tracker_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_min_temperature() -> f64 {
    15.5
}

fn default_max_temperature() -> f64 {
    30.0
}

fn default_reboot_command() -> Vec<String> {
    vec!["sudo".to_owned(), "reboot".to_owned()]
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9899))
}

fn default_simulation_seed() -> u64 {
    0x5EED_u64
}

fn default_climate_capable() -> bool {
    true
}

fn default_initial_climate_state() -> String {
    "off".to_owned()
}

fn default_initial_target_temperature() -> f64 {
    21.0
}

fn default_steps_to_outcome() -> u32 {
    2
}

/// Primary configuration object for the vdash runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub vehicle: VehicleConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub climate: ClimateConfig,
    #[serde(default)]
    pub reboot: RebootConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "VDASH_CONFIG";

    /// Load configuration from disk, respecting the `VDASH_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.sync.validate()?;
        self.climate.validate()?;
        self.reboot.validate()?;
        self.simulation.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleConfig {
    #[serde(default = "default_vin")]
    pub vin: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            vin: default_vin(),
            nickname: None,
        }
    }
}

/// Polling cadence and failure escalation for the synchronisation engine.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_day_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub day_interval: Duration,
    #[serde(default = "default_night_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub night_interval: Duration,
    #[serde(default = "default_daytime_start")]
    pub daytime_start: NaiveTime,
    #[serde(default = "default_nighttime_start")]
    pub nighttime_start: NaiveTime,
    #[serde(default = "default_full_refresh_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub full_refresh_interval: Duration,
    #[serde(default = "default_cooldown")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cooldown: Duration,
    #[serde(default = "default_skip_limit")]
    pub skip_limit: u32,
    #[serde(default = "default_restart_limit")]
    pub restart_limit: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            day_interval: default_day_interval(),
            night_interval: default_night_interval(),
            daytime_start: default_daytime_start(),
            nighttime_start: default_nighttime_start(),
            full_refresh_interval: default_full_refresh_interval(),
            cooldown: default_cooldown(),
            skip_limit: default_skip_limit(),
            restart_limit: default_restart_limit(),
        }
    }
}

impl SyncConfig {
    pub fn schedule(&self) -> DaySchedule {
        DaySchedule::new(self.daytime_start, self.nighttime_start)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("day_interval", self.day_interval),
            ("night_interval", self.night_interval),
            ("full_refresh_interval", self.full_refresh_interval),
            ("cooldown", self.cooldown),
        ] {
            if value.is_zero() {
                return Err(anyhow!("sync.{} must be greater than zero", name));
            }
        }
        if self.skip_limit == 0 {
            return Err(anyhow!("sync.skip_limit must be at least 1"));
        }
        if self.restart_limit == 0 {
            return Err(anyhow!("sync.restart_limit must be at least 1"));
        }
        if self.daytime_start == self.nighttime_start {
            return Err(anyhow!(
                "sync.daytime_start and sync.nighttime_start must differ"
            ));
        }
        Ok(())
    }
}

/// Timing and temperature limits for remote climate commands.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClimateConfig {
    #[serde(default = "default_deadline")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub deadline: Duration,
    #[serde(default = "default_finder_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub finder_interval: Duration,
    #[serde(default = "default_tracker_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub tracker_interval: Duration,
    #[serde(default = "default_min_temperature")]
    pub min_temperature: f64,
    #[serde(default = "default_max_temperature")]
    pub max_temperature: f64,
}

impl Default for ClimateConfig {
    fn default() -> Self {
        Self {
            deadline: default_deadline(),
            finder_interval: default_finder_interval(),
            tracker_interval: default_tracker_interval(),
            min_temperature: default_min_temperature(),
            max_temperature: default_max_temperature(),
        }
    }
}

impl ClimateConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("deadline", self.deadline),
            ("finder_interval", self.finder_interval),
            ("tracker_interval", self.tracker_interval),
        ] {
            if value.is_zero() {
                return Err(anyhow!("climate.{} must be greater than zero", name));
            }
        }
        if !(self.min_temperature < self.max_temperature) {
            return Err(anyhow!(
                "climate.min_temperature ({}) must be below climate.max_temperature ({})",
                self.min_temperature,
                self.max_temperature
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebootConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_reboot_command")]
    pub command: Vec<String>,
}

impl Default for RebootConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: default_reboot_command(),
        }
    }
}

impl RebootConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.command.is_empty() {
            return Err(anyhow!("reboot.command must not be empty when enabled"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Behaviour of the in-process simulated vehicle service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_simulation_seed")]
    pub seed: u64,
    #[serde(default = "default_climate_capable")]
    pub climate_capable: bool,
    #[serde(default = "default_initial_climate_state")]
    pub initial_climate_state: String,
    #[serde(default = "default_initial_target_temperature")]
    pub initial_target_temperature: f64,
    /// Expose the target temperature in Kelvin only.
    #[serde(default)]
    pub kelvin_only: bool,
    #[serde(default)]
    pub transport_failure_rate: f64,
    /// Number of fetches a staged command spends in progress before it settles.
    #[serde(default = "default_steps_to_outcome")]
    pub steps_to_outcome: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: default_simulation_seed(),
            climate_capable: default_climate_capable(),
            initial_climate_state: default_initial_climate_state(),
            initial_target_temperature: default_initial_target_temperature(),
            kelvin_only: false,
            transport_failure_rate: 0.0,
            steps_to_outcome: default_steps_to_outcome(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.transport_failure_rate) {
            return Err(anyhow!(
                "simulation.transport_failure_rate must be within [0, 1], got {}",
                self.transport_failure_rate
            ));
        }
        let state = self.initial_climate_state.to_ascii_lowercase();
        if !CLIMATE_STATE_NAMES.contains(&state.as_str()) {
            return Err(anyhow!(
                "simulation.initial_climate_state '{}' is not one of {}",
                self.initial_climate_state,
                CLIMATE_STATE_NAMES.join(", ")
            ));
        }
        Ok(())
    }
}
