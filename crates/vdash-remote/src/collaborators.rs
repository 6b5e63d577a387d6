//! ---
//! vdash_section: "02-messaging-ipc-data-model"
//! vdash_subsection: "module"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Remote vehicle model and collaborator interfaces."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::{error, info, warn};
use vdash_common::config::RebootConfig;

/// Command family a success or failure signal refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    ClimateStart,
    ClimateStop,
    TargetTemperature,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::ClimateStart => "climate_start",
            SignalKind::ClimateStop => "climate_stop",
            SignalKind::TargetTemperature => "target_temperature",
        }
    }
}

/// Fire-and-forget indications consumed by the LED and display layers.
pub trait SignalSink: Send + Sync {
    /// A visible remote fetch started.
    fn activity(&self);
    /// Remote access finished and any error indication is cleared.
    fn idle(&self);
    /// Persistent remote error indication.
    fn error(&self);
    fn success(&self, kind: SignalKind);
    fn failure(&self, kind: SignalKind);
}

/// Gate on the vehicle-selection menu.
pub trait SwitchLock: Send + Sync {
    fn disable(&self);
    fn enable(&self);
}

/// Last-resort recovery when the scheduler keeps wedging.
pub trait RebootAction: Send + Sync {
    fn reboot(&self);
}

/// Vehicle-selection gate backed by an atomic flag.
#[derive(Debug)]
pub struct VehicleSwitchGate {
    allowed: AtomicBool,
    disables: AtomicU32,
    enables: AtomicU32,
}

impl VehicleSwitchGate {
    pub fn new() -> Self {
        Self {
            allowed: AtomicBool::new(true),
            disables: AtomicU32::new(0),
            enables: AtomicU32::new(0),
        }
    }

    pub fn is_change_allowed(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }

    pub fn disable_count(&self) -> u32 {
        self.disables.load(Ordering::SeqCst)
    }

    pub fn enable_count(&self) -> u32 {
        self.enables.load(Ordering::SeqCst)
    }
}

impl Default for VehicleSwitchGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SwitchLock for VehicleSwitchGate {
    fn disable(&self) {
        self.disables.fetch_add(1, Ordering::SeqCst);
        if !self.allowed.swap(false, Ordering::SeqCst) {
            warn!(target: "vdash::remote", "vehicle change already disabled");
        }
    }

    fn enable(&self) {
        self.enables.fetch_add(1, Ordering::SeqCst);
        self.allowed.store(true, Ordering::SeqCst);
    }
}

/// Signal sink that only logs. Stands in for the LED and display drivers.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSignalSink;

impl SignalSink for TracingSignalSink {
    fn activity(&self) {
        tracing::debug!(target: "vdash::signal", "activity");
    }

    fn idle(&self) {
        tracing::debug!(target: "vdash::signal", "idle");
    }

    fn error(&self) {
        warn!(target: "vdash::signal", "remote error indication on");
    }

    fn success(&self, kind: SignalKind) {
        info!(target: "vdash::signal", kind = kind.as_str(), "success");
    }

    fn failure(&self, kind: SignalKind) {
        warn!(target: "vdash::signal", kind = kind.as_str(), "failure");
    }
}

/// Signal captured by [`RecordingSignalSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Activity,
    Idle,
    Error,
    Success(SignalKind),
    Failure(SignalKind),
}

/// In-memory signal sink.
#[derive(Debug, Default)]
pub struct RecordingSignalSink {
    signals: Mutex<Vec<Signal>>,
}

impl RecordingSignalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().clone()
    }

    pub fn count(&self, signal: Signal) -> usize {
        self.signals.lock().iter().filter(|s| **s == signal).count()
    }

    fn push(&self, signal: Signal) {
        self.signals.lock().push(signal);
    }
}

impl SignalSink for RecordingSignalSink {
    fn activity(&self) {
        self.push(Signal::Activity);
    }

    fn idle(&self) {
        self.push(Signal::Idle);
    }

    fn error(&self) {
        self.push(Signal::Error);
    }

    fn success(&self, kind: SignalKind) {
        self.push(Signal::Success(kind));
    }

    fn failure(&self, kind: SignalKind) {
        self.push(Signal::Failure(kind));
    }
}

/// Runs the configured reboot command. Disabled configurations only log.
#[derive(Debug, Clone)]
pub struct CommandReboot {
    enabled: bool,
    command: Vec<String>,
}

impl CommandReboot {
    pub fn from_config(config: &RebootConfig) -> Self {
        Self {
            enabled: config.enabled,
            command: config.command.clone(),
        }
    }
}

impl RebootAction for CommandReboot {
    fn reboot(&self) {
        let Some((program, args)) = self.command.split_first() else {
            error!(target: "vdash::remote", "reboot requested without a command");
            return;
        };
        if !self.enabled {
            warn!(target: "vdash::remote", command = ?self.command, "reboot requested but disabled");
            return;
        }
        warn!(target: "vdash::remote", command = ?self.command, "rebooting device");
        if let Err(err) = Command::new(program).args(args).spawn() {
            error!(target: "vdash::remote", error = %err, "failed to launch reboot command");
        }
    }
}

/// Counts reboot requests instead of acting on them.
#[derive(Debug, Default)]
pub struct RecordingReboot {
    count: AtomicU32,
}

impl RecordingReboot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl RebootAction for RecordingReboot {
    fn reboot(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_gate_counts_transitions() {
        let gate = VehicleSwitchGate::new();
        assert!(gate.is_change_allowed());
        gate.disable();
        assert!(!gate.is_change_allowed());
        gate.enable();
        assert!(gate.is_change_allowed());
        assert_eq!(gate.disable_count(), 1);
        assert_eq!(gate.enable_count(), 1);
    }

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingSignalSink::new();
        sink.activity();
        sink.idle();
        sink.success(SignalKind::ClimateStart);
        assert_eq!(
            sink.signals(),
            vec![
                Signal::Activity,
                Signal::Idle,
                Signal::Success(SignalKind::ClimateStart)
            ]
        );
        assert_eq!(sink.count(Signal::Success(SignalKind::ClimateStart)), 1);
    }

    #[test]
    fn disabled_reboot_does_not_spawn() {
        let reboot = CommandReboot::from_config(&RebootConfig {
            enabled: false,
            command: vec!["definitely-not-a-real-binary".into()],
        });
        reboot.reboot();
    }
}
