//! ---
//! vdash_section: "02-messaging-ipc-data-model"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Remote vehicle model and collaborator interfaces."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// Offset between Celsius and Kelvin.
pub const KELVIN_OFFSET: f64 = 273.15;

/// Remote data domains that can be refreshed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Every domain, including capability metadata.
    All,
    Charging,
    Climatisation,
    Measurements,
    Readiness,
    Parking,
    UserCapabilities,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::All => "all",
            Domain::Charging => "charging",
            Domain::Climatisation => "climatisation",
            Domain::Measurements => "measurements",
            Domain::Readiness => "readiness",
            Domain::Parking => "parking",
            Domain::UserCapabilities => "user_capabilities",
        }
    }

    /// Domain set refreshed by the regular polling job.
    pub fn default_set() -> Vec<Domain> {
        vec![
            Domain::Charging,
            Domain::Climatisation,
            Domain::Measurements,
            Domain::Readiness,
        ]
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Climatisation state reported by the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClimateState {
    Off,
    Heating,
    Cooling,
    Ventilation,
    #[default]
    Unknown,
}

impl ClimateState {
    /// ON-class states: the climate function is actively running.
    pub fn is_on(&self) -> bool {
        matches!(
            self,
            ClimateState::Heating | ClimateState::Cooling | ClimateState::Ventilation
        )
    }

    /// OFF-class states. An unknown state counts as off.
    pub fn is_off(&self) -> bool {
        !self.is_on()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClimateState::Off => "off",
            ClimateState::Heating => "heating",
            ClimateState::Cooling => "cooling",
            ClimateState::Ventilation => "ventilation",
            ClimateState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ClimateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClimateState {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(ClimateState::Off),
            "heating" => Ok(ClimateState::Heating),
            "cooling" => Ok(ClimateState::Cooling),
            "ventilation" => Ok(ClimateState::Ventilation),
            "unknown" => Ok(ClimateState::Unknown),
            other => Err(RemoteError::InvalidValue(format!(
                "unknown climate state: {other}"
            ))),
        }
    }
}

/// Value written to the remote climatisation command attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlOperation {
    Start,
    Stop,
}

impl ControlOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlOperation::Start => "start",
            ControlOperation::Stop => "stop",
        }
    }

    /// Whether `state` already satisfies this operation.
    pub fn is_satisfied_by(&self, state: ClimateState) -> bool {
        match self {
            ControlOperation::Start => state.is_on(),
            ControlOperation::Stop => state.is_off(),
        }
    }
}

impl fmt::Display for ControlOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a queued remote request as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Queued,
    InProgress,
    Delayed,
    Successful,
    FailVehicleIsOffline,
    FailBatteryLow,
    FailChargePlugNotConnected,
    FailIgnitionOn,
    FailPlugError,
    Fail,
    Unknown,
    PollingTimeout,
    Timeout,
}

impl RequestStatus {
    pub fn is_ongoing(&self) -> bool {
        matches!(
            self,
            RequestStatus::Queued | RequestStatus::InProgress | RequestStatus::Delayed
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RequestStatus::Successful)
    }

    pub fn is_failure(&self) -> bool {
        !self.is_ongoing() && !self.is_success()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Queued => "QUEUED",
            RequestStatus::InProgress => "IN_PROGRESS",
            RequestStatus::Delayed => "DELAYED",
            RequestStatus::Successful => "SUCCESSFUL",
            RequestStatus::FailVehicleIsOffline => "FAIL_VEHICLE_IS_OFFLINE",
            RequestStatus::FailBatteryLow => "FAIL_BATTERY_LOW",
            RequestStatus::FailChargePlugNotConnected => "FAIL_CHARGE_PLUG_NOT_CONNECTED",
            RequestStatus::FailIgnitionOn => "FAIL_IGNITION_ON",
            RequestStatus::FailPlugError => "FAIL_PLUG_ERROR",
            RequestStatus::Fail => "FAIL",
            RequestStatus::Unknown => "UNKNOWN",
            RequestStatus::PollingTimeout => "POLLING_TIMEOUT",
            RequestStatus::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry of the remote pending-requests collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub id: String,
    pub operation: ControlOperation,
    pub status: RequestStatus,
}

impl PendingRequest {
    pub fn new(id: impl Into<String>, operation: ControlOperation, status: RequestStatus) -> Self {
        Self {
            id: id.into(),
            operation,
            status,
        }
    }
}

/// Change notification published on the pending-requests channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    /// The collection gained or lost entries. Carries the full snapshot.
    CollectionChanged(Vec<PendingRequest>),
    /// A single request changed status.
    StatusChanged(PendingRequest),
}

/// Unit the remote target-temperature attribute is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Celsius,
    Kelvin,
}

impl TemperatureUnit {
    pub fn convert_celsius(&self, celsius: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Kelvin => celsius + KELVIN_OFFSET,
        }
    }

    pub fn to_celsius(&self, value: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => value,
            TemperatureUnit::Kelvin => value - KELVIN_OFFSET,
        }
    }
}

/// Identity of the selected vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub vin: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

impl VehicleInfo {
    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.vin)
    }
}
