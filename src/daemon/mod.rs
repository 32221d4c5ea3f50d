//! Daemon module for theftguard.
//!
//! This module contains the core daemon functionality:
//! - `machine`: Pure alarm state machine
//! - `timer`: Generation-stamped countdown and grace timers
//! - `coordinator`: Single-consumer event loop owning all state
//! - `ipc`: Unix socket server translating requests into events
//! - `runtime`: Service assembly and the daemon entry point

pub mod coordinator;
pub mod ipc;
pub mod machine;
pub mod runtime;
pub mod timer;

pub use coordinator::{AlarmCoordinator, ConfigUpdate, CoordinatorError, CoordinatorHandle, Inbound};
pub use ipc::{IpcServer, RequestHandler};
pub use machine::{AlarmMachine, Effect};
pub use runtime::{run_daemon, GuardServices, ServiceOptions};
pub use timer::{EscalationTimer, TimerExpiry};
