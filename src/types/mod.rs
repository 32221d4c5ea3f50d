//! Core data types for the alarm coordinator.
//!
//! This module defines the data structures used for:
//! - Alarm state and the transition event union
//! - Outbound effector commands
//! - Observable state snapshots
//! - IPC request/response serialization

pub mod config;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use config::{CountdownConfig, DeviceSpec, EscalationPolicy, GuardConfig, ProximityThresholds};

use crate::auth::AuthFailureReason;

// ============================================================================
// AlarmState
// ============================================================================

/// The security state held by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    /// Not guarding
    #[default]
    Idle,
    /// Monitors running, waiting for a trigger
    Armed,
    /// A trigger fired, countdown to alarm is running
    Triggered,
    /// The siren is playing
    Alarming,
}

impl AlarmState {
    /// All states, in escalation order.
    pub const ALL: [AlarmState; 4] = [
        AlarmState::Idle,
        AlarmState::Armed,
        AlarmState::Triggered,
        AlarmState::Alarming,
    ];

    /// Returns the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Idle => "idle",
            AlarmState::Armed => "armed",
            AlarmState::Triggered => "triggered",
            AlarmState::Alarming => "alarming",
        }
    }

    /// Returns true if monitors are expected to be running.
    pub fn is_guarding(&self) -> bool {
        !matches!(self, AlarmState::Idle)
    }

    /// Returns true if a disarm from this state must pass the auth gate.
    pub fn is_escalated(&self) -> bool {
        matches!(self, AlarmState::Triggered | AlarmState::Alarming)
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TriggerSource
// ============================================================================

/// The monitor adapters that can trigger an armed system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Keyboard, mouse or trackpad activity
    Input,
    /// Lid was closed
    Lid,
    /// Power adapter was unplugged
    Power,
}

impl TriggerSource {
    /// All trigger sources.
    pub const ALL: [TriggerSource; 3] = [TriggerSource::Input, TriggerSource::Lid, TriggerSource::Power];

    /// Returns the string representation of the source.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Input => "input",
            TriggerSource::Lid => "lid",
            TriggerSource::Power => "power",
        }
    }

    /// Returns the transition event this source produces.
    pub fn event(&self) -> TransitionEvent {
        match self {
            TriggerSource::Input => TransitionEvent::InputDetected,
            TriggerSource::Lid => TransitionEvent::LidClosed,
            TriggerSource::Power => TransitionEvent::PowerDisconnected,
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(TriggerSource::Input),
            "lid" => Ok(TriggerSource::Lid),
            "power" => Ok(TriggerSource::Power),
            other => Err(format!("不明なトリガー種別です: {}", other)),
        }
    }
}

// ============================================================================
// Devices
// ============================================================================

/// Stable identifier of a trusted device (e.g. a Bluetooth address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Radio transport a trusted device is observed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Bluetooth Classic
    Classic,
    /// Bluetooth Low Energy
    #[default]
    LowEnergy,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "classic" => Ok(TransportKind::Classic),
            "low_energy" | "le" | "ble" => Ok(TransportKind::LowEnergy),
            other => Err(format!("不明なトランスポート種別です: {}", other)),
        }
    }
}

/// Debounced proximity classification of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proximity {
    /// Strong enough signal, the owner is around
    Near,
    /// Confirmed gone, or never seen
    #[default]
    Away,
}

// ============================================================================
// Timers
// ============================================================================

/// The two single-shot timers the coordinator owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Trigger-to-alarm escalation
    Countdown,
    /// Auto-arm delay after all devices left
    Grace,
}

/// Monotonic stamp carried by a scheduled timer and its expiry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerGeneration(pub u64);

impl fmt::Display for TimerGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// TransitionEvent
// ============================================================================

/// Every input the state machine accepts.
///
/// This union is the serialization boundary: state only changes in response
/// to one of these, processed one at a time by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEvent {
    /// Keyboard/mouse activity was observed
    InputDetected,
    /// The lid was closed
    LidClosed,
    /// AC power was disconnected
    PowerDisconnected,
    /// A trusted device became near
    DeviceNear(DeviceId),
    /// Every trusted device is confirmed away
    AllDevicesAway,
    /// The countdown timer with this generation expired
    CountdownExpired(TimerGeneration),
    /// The grace timer with this generation expired
    GraceExpired(TimerGeneration),
    /// The auth gate accepted the user
    AuthSucceeded,
    /// The auth gate rejected the user
    AuthFailed(AuthFailureReason),
    /// Manual arm request
    UserArm,
    /// Manual disarm request
    UserDisarm,
}

impl TransitionEvent {
    /// Returns a short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            TransitionEvent::InputDetected => "input_detected",
            TransitionEvent::LidClosed => "lid_closed",
            TransitionEvent::PowerDisconnected => "power_disconnected",
            TransitionEvent::DeviceNear(_) => "device_near",
            TransitionEvent::AllDevicesAway => "all_devices_away",
            TransitionEvent::CountdownExpired(_) => "countdown_expired",
            TransitionEvent::GraceExpired(_) => "grace_expired",
            TransitionEvent::AuthSucceeded => "auth_succeeded",
            TransitionEvent::AuthFailed(_) => "auth_failed",
            TransitionEvent::UserArm => "user_arm",
            TransitionEvent::UserDisarm => "user_disarm",
        }
    }

    /// Returns the trigger source if this is a monitor trigger.
    pub fn trigger_source(&self) -> Option<TriggerSource> {
        match self {
            TransitionEvent::InputDetected => Some(TriggerSource::Input),
            TransitionEvent::LidClosed => Some(TriggerSource::Lid),
            TransitionEvent::PowerDisconnected => Some(TriggerSource::Power),
            _ => None,
        }
    }
}

// ============================================================================
// Command
// ============================================================================

/// Outbound commands issued to effectors and the UI.
///
/// Every command is idempotent: executing it twice in a row is harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Start the enabled trigger monitors
    StartMonitors {
        /// Monitor kinds to run
        sources: Vec<TriggerSource>,
    },
    /// Stop all trigger monitors
    StopMonitors,
    /// Start the siren
    PlayAlarm {
        /// Sound name
        sound: String,
        /// Volume, 0.0 to 1.0
        volume: f32,
    },
    /// Stop the siren
    StopAlarm,
    /// Lock the screen
    LockScreen,
    /// Keep the machine awake while armed
    PreventSleep,
    /// Undo `PreventSleep`
    RestoreSleepPolicy,
    /// Show the escalation overlay
    ShowEscalation {
        /// What triggered the escalation
        source: TriggerSource,
        /// Seconds until the alarm sounds
        seconds: u32,
    },
    /// Hide the escalation overlay
    DismissEscalation,
    /// Authentication failed, let the user try again
    AuthRetry {
        /// Why the last attempt failed
        reason: AuthFailureReason,
    },
}

impl Command {
    /// Returns a short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartMonitors { .. } => "start_monitors",
            Command::StopMonitors => "stop_monitors",
            Command::PlayAlarm { .. } => "play_alarm",
            Command::StopAlarm => "stop_alarm",
            Command::LockScreen => "lock_screen",
            Command::PreventSleep => "prevent_sleep",
            Command::RestoreSleepPolicy => "restore_sleep_policy",
            Command::ShowEscalation { .. } => "show_escalation",
            Command::DismissEscalation => "dismiss_escalation",
            Command::AuthRetry { .. } => "auth_retry",
        }
    }

    /// Returns true if the command only concerns the UI layer.
    pub fn is_ui(&self) -> bool {
        matches!(
            self,
            Command::ShowEscalation { .. } | Command::DismissEscalation | Command::AuthRetry { .. }
        )
    }
}

// ============================================================================
// StateSnapshot
// ============================================================================

/// Remaining time of the active timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    /// Which timer is running
    pub kind: TimerKind,
    /// Milliseconds until expiry
    #[serde(rename = "remainingMs")]
    pub remaining_ms: u64,
}

impl TimerSnapshot {
    /// Remaining time rounded up to whole seconds.
    pub fn remaining_seconds(&self) -> u64 {
        self.remaining_ms.div_ceil(1000)
    }
}

/// Per-device view for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Device id
    pub id: DeviceId,
    /// Display name
    pub name: String,
    /// Transport kind
    pub kind: TransportKind,
    /// Current classification
    pub proximity: Proximity,
    /// Last valid signal strength
    #[serde(rename = "lastStrength", skip_serializing_if = "Option::is_none")]
    pub last_strength: Option<i16>,
}

/// Observable state of the coordinator, published after every change.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Current alarm state
    pub state: AlarmState,
    /// Idle with an auto-arm grace timer running
    #[serde(rename = "gracePending")]
    pub grace_pending: bool,
    /// Active timer, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerSnapshot>,
    /// Failed auth attempts during the current escalation
    #[serde(rename = "failedAuthAttempts")]
    pub failed_auth_attempts: u32,
    /// What caused the current escalation
    #[serde(rename = "lastTrigger", skip_serializing_if = "Option::is_none")]
    pub last_trigger: Option<TriggerSource>,
    /// At least one trusted device is near
    #[serde(rename = "anyDeviceNear")]
    pub any_device_near: bool,
    /// Trusted devices
    #[serde(default)]
    pub devices: Vec<DeviceStatus>,
}

// ============================================================================
// IPC Types
// ============================================================================

/// IPC request from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Arm the system
    Arm,
    /// Disarm the system (authenticates first when escalated)
    Disarm {
        /// PIN, if not using biometrics
        #[serde(skip_serializing_if = "Option::is_none")]
        pin: Option<String>,
    },
    /// Authenticate to cancel an escalation
    Auth {
        /// PIN, if not using biometrics
        #[serde(skip_serializing_if = "Option::is_none")]
        pin: Option<String>,
    },
    /// Query the current status
    Status,
    /// Report a signal sample from an external scanner
    Sample {
        /// Device id
        #[serde(rename = "deviceId")]
        device_id: DeviceId,
        /// Signal strength, absent when unavailable
        #[serde(skip_serializing_if = "Option::is_none")]
        rssi: Option<i16>,
        /// Device is connected even if unmeasurable
        #[serde(default)]
        connected: bool,
    },
    /// Report a monitor trigger from an external adapter
    Trigger {
        /// Trigger source
        source: TriggerSource,
    },
    /// Add a trusted device
    DeviceAdd {
        /// Device description
        #[serde(flatten)]
        device: DeviceSpec,
    },
    /// Remove a trusted device
    DeviceRemove {
        /// Device id
        id: DeviceId,
    },
}

/// Response data for IPC responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusData {
    /// Current state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Grace timer running
    #[serde(rename = "gracePending", skip_serializing_if = "Option::is_none")]
    pub grace_pending: Option<bool>,
    /// Remaining seconds of the active timer
    #[serde(rename = "remainingSeconds", skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<u64>,
    /// Failed auth attempts
    #[serde(rename = "failedAuthAttempts", skip_serializing_if = "Option::is_none")]
    pub failed_auth_attempts: Option<u32>,
    /// Last trigger source
    #[serde(rename = "lastTrigger", skip_serializing_if = "Option::is_none")]
    pub last_trigger: Option<TriggerSource>,
    /// Trusted devices
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceStatus>,
}

impl StatusData {
    /// Creates response data from a state snapshot.
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Self {
        Self {
            state: Some(snapshot.state.as_str().to_string()),
            grace_pending: Some(snapshot.grace_pending),
            remaining_seconds: snapshot.timer.map(|t| t.remaining_seconds()),
            failed_auth_attempts: Some(snapshot.failed_auth_attempts),
            last_trigger: snapshot.last_trigger,
            devices: snapshot.devices.clone(),
        }
    }
}

/// IPC response from daemon to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    /// Response status ("success" or "error")
    pub status: String,
    /// Human-readable message
    pub message: String,
    /// Optional response data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<StatusData>,
}

impl IpcResponse {
    /// Creates a success response.
    pub fn success(message: impl Into<String>, data: Option<StatusData>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data,
        }
    }

    /// Creates an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            data: None,
        }
    }

    /// Creates an error response that still carries the current status.
    pub fn error_with_data(message: impl Into<String>, data: StatusData) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }

    /// Returns true for a success response.
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

// ============================================================================
// Tests
// ============================================================================
