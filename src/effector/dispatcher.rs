//! Ordered command dispatch.
//!
//! The coordinator hands commands to a single dispatcher task, so effects
//! run in the order they were issued and a slow effector never stalls the
//! coordinator. Each command runs under its own timeout.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::{Effector, EffectorError};
use crate::types::Command;

/// Capacity of the notice broadcast channel.
const NOTICE_CAPACITY: usize = 64;

/// A command that failed, published for observers.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectorNotice {
    /// The command that failed
    pub command: Command,
    /// Why it failed
    pub error: EffectorError,
}

enum Dispatch {
    Run(Command),
    Flush(oneshot::Sender<()>),
}

/// Sending side of the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<Dispatch>,
    notices: broadcast::Sender<EffectorNotice>,
}

impl DispatcherHandle {
    /// Queues a command. Returns false if the dispatcher has stopped.
    pub fn dispatch(&self, command: Command) -> bool {
        self.tx.send(Dispatch::Run(command)).is_ok()
    }

    /// Waits until every command queued so far has finished.
    ///
    /// Returns false if the dispatcher has stopped.
    pub async fn flush(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Dispatch::Flush(tx)).is_err() {
            return false;
        }
        rx.await.is_ok()
    }

    /// Subscribes to failure notices.
    pub fn notices(&self) -> broadcast::Receiver<EffectorNotice> {
        self.notices.subscribe()
    }
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Run(command) => write!(f, "Run({})", command.name()),
            Dispatch::Flush(_) => f.write_str("Flush"),
        }
    }
}

/// Executes commands one at a time against an effector.
pub struct CommandDispatcher<E> {
    effector: Arc<E>,
    timeout: Duration,
    inbox: mpsc::UnboundedReceiver<Dispatch>,
    notices: broadcast::Sender<EffectorNotice>,
}

impl<E: Effector> CommandDispatcher<E> {
    /// Creates a dispatcher and its handle.
    pub fn new(effector: Arc<E>, timeout: Duration) -> (Self, DispatcherHandle) {
        let (tx, inbox) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let handle = DispatcherHandle {
            tx,
            notices: notices.clone(),
        };
        (
            Self {
                effector,
                timeout,
                inbox,
                notices,
            },
            handle,
        )
    }

    /// Spawns the dispatch loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(message) = self.inbox.recv().await {
            match message {
                Dispatch::Run(command) => self.execute(command).await,
                Dispatch::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("コマンドディスパッチャーを終了します");
    }

    async fn execute(&self, command: Command) {
        match timeout(self.timeout, self.effector.execute(&command)).await {
            Ok(Ok(())) => debug!("コマンドを実行しました: {}", command.name()),
            Ok(Err(error)) => self.notify(command, error),
            Err(_) => {
                let error = EffectorError::Timeout {
                    command: command.name(),
                    timeout_ms: self.timeout.as_millis() as u64,
                };
                self.notify(command, error);
            }
        }
    }

    fn notify(&self, command: Command, error: EffectorError) {
        warn!("{} ({})", error, error.suggestion());
        let _ = self.notices.send(EffectorNotice { command, error });
    }
}
