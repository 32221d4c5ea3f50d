//! theftguard Library
//!
//! This library provides the reactive core of a laptop anti-theft alarm.
//! It includes:
//! - Alarm coordinator owning the `Idle → Armed → Triggered → Alarming`
//!   state machine, with generation-stamped countdown and grace timers
//! - Proximity tracking of trusted devices with hysteresis and debouncing
//! - Authentication gate for cancelling an escalation
//! - Effectors (siren, lock screen, sleep policy) and trigger monitors
//! - IPC server/client for daemon-CLI communication
//! - Type definitions for configuration, events, commands and snapshots

pub mod auth;
pub mod cli;
pub mod daemon;
pub mod effector;
pub mod monitor;
pub mod proximity;
pub mod sound;
pub mod types;

// Re-export commonly used types for convenience
pub use types::{
    AlarmState, Command, DeviceId, GuardConfig, IpcRequest, IpcResponse, StateSnapshot,
    StatusData, TransitionEvent, TriggerSource,
};

// Re-export the coordinator surface
pub use daemon::{
    AlarmCoordinator, ConfigUpdate, CoordinatorError, CoordinatorHandle, GuardServices,
    ServiceOptions,
};

// Re-export collaborator traits and mocks
pub use auth::{AuthGate, AuthOutcome, AuthRequest, LocalAuthGate, MockAuthGate};
pub use effector::{CommandDispatcher, Effector, EffectorError, MockEffector, SystemEffector};
pub use monitor::{EventSink, ManualMonitor, MonitorAdapter, MonitorHub};
pub use proximity::{ProximityError, ProximitySignal, ProximityTracker};
pub use sound::{AlarmPlayer, MockAlarmPlayer, RodioAlarmPlayer, SoundError, SoundSource};
