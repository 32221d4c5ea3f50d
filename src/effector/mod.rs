//! Effectors: the side of the system that acts on coordinator commands.
//!
//! The coordinator never calls an effector directly. Commands flow through
//! the [`CommandDispatcher`], which executes them in order under a timeout
//! and turns failures into [`EffectorNotice`]s.
//!
//! ```text
//! AlarmCoordinator ──Command──▶ CommandDispatcher ──▶ Effector
//!                                      │
//!                                      └──▶ EffectorNotice (broadcast)
//! ```

pub mod dispatcher;
pub mod error;
pub mod system;

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

pub use dispatcher::{CommandDispatcher, DispatcherHandle, EffectorNotice};
pub use error::EffectorError;
pub use system::{OsCommands, SystemEffector};

use crate::types::Command;

/// Trait for command executors.
///
/// Every command is idempotent, so implementations must tolerate repeats.
pub trait Effector: Send + Sync + 'static {
    /// Executes one command.
    fn execute(&self, command: &Command) -> impl Future<Output = Result<(), EffectorError>> + Send;
}

/// Mock effector for testing.
#[derive(Debug, Default)]
pub struct MockEffector {
    executed: Mutex<Vec<Command>>,
    failures: Mutex<Vec<(&'static str, EffectorError)>>,
    delay: Mutex<Option<Duration>>,
}

impl MockEffector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every command with this name fail.
    pub fn fail_with(&self, command: &'static str, error: EffectorError) {
        self.failures.lock().unwrap().push((command, error));
    }

    /// Delays every command.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    #[must_use]
    pub fn executed(&self) -> Vec<Command> {
        self.executed.lock().unwrap().clone()
    }

    #[must_use]
    pub fn count(&self, command: &str) -> usize {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.name() == command)
            .count()
    }

    pub fn clear(&self) {
        self.executed.lock().unwrap().clear();
    }
}

impl Effector for MockEffector {
    async fn execute(&self, command: &Command) -> Result<(), EffectorError> {
        self.executed.lock().unwrap().push(command.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| *name == command.name())
            .map(|(_, error)| error.clone());
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
