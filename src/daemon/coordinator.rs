//! The alarm coordinator.
//!
//! Every producer (monitors, the proximity scanner, the UI, timers) sends
//! into one inbound channel. A single task consumes it, one message at a
//! time, and is the only place where the alarm state, the proximity
//! tracker and the active timer are mutated.
//!
//! ```text
//!  monitors ─┐
//!  scanner  ─┤                 ┌──────────────────┐   watch      ┌────┐
//!  IPC/UI   ─┼──▶ Inbound ───▶ │ AlarmCoordinator │ ──────────▶  │ UI │
//!  timers   ─┘    (mpsc)       └────────┬─────────┘  broadcast   └────┘
//!                                       │ Command
//!                                       ▼
//!                              CommandDispatcher
//! ```

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::machine::{AlarmMachine, Effect};
use super::timer::{EscalationTimer, TimerExpiry};
use crate::effector::DispatcherHandle;
use crate::monitor::EventSink;
use crate::proximity::{ProximityError, ProximitySignal, ProximityTracker};
use crate::types::{
    Command, CountdownConfig, DeviceId, DeviceSpec, EscalationPolicy, GuardConfig,
    ProximityThresholds, StateSnapshot, TimerKind, TransitionEvent,
};

/// Capacity of the command feed.
const COMMAND_FEED_CAPACITY: usize = 256;

// ============================================================================
// Messages
// ============================================================================

/// Runtime configuration change, applied in order with events.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigUpdate {
    /// Start tracking a device
    AddDevice(DeviceSpec),
    /// Stop tracking a device
    RemoveDevice(DeviceId),
    /// Replace the proximity thresholds
    SetThresholds(ProximityThresholds),
    /// Replace the countdown durations
    SetCountdown(CountdownConfig),
    /// Toggle auto-arm when every device leaves
    SetAutoArmOnLeave(bool),
    /// Replace the escalation policy
    SetPolicy(EscalationPolicy),
}

/// Errors returned to coordinator callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The coordinator task has stopped.
    #[error("コーディネーターが停止しています")]
    Closed,

    /// A device or threshold change was rejected.
    #[error(transparent)]
    Proximity(#[from] ProximityError),

    /// The countdown durations are out of range.
    #[error("カウントダウン設定が不正です: {0}")]
    InvalidCountdown(String),

    /// The escalation policy is invalid.
    #[error("エスカレーション設定が不正です: {0}")]
    InvalidPolicy(String),

    /// Some other part of the configuration is invalid.
    #[error("設定が不正です: {0}")]
    InvalidConfig(String),
}

/// Message consumed by the coordinator.
#[derive(Debug)]
pub enum Inbound {
    /// A transition event
    Event(TransitionEvent),
    /// A signal-strength sample
    Sample {
        /// Sampled device
        device_id: DeviceId,
        /// Strength, absent when unavailable
        strength: Option<i16>,
        /// When the sample was taken
        at: Instant,
    },
    /// Device connected but its strength is unmeasurable
    Connected {
        /// Connected device
        device_id: DeviceId,
        /// When the connection was observed
        at: Instant,
    },
    /// A configuration change
    Configure {
        /// The change
        update: ConfigUpdate,
        /// Result of the change
        reply: Option<oneshot::Sender<Result<(), CoordinatorError>>>,
    },
    /// A timer fired
    Expired(TimerExpiry),
    /// Answered once every earlier message has been processed
    Barrier(oneshot::Sender<()>),
    /// Stop the coordinator
    Shutdown,
}

impl From<TimerExpiry> for Inbound {
    fn from(expiry: TimerExpiry) -> Self {
        Inbound::Expired(expiry)
    }
}

// ============================================================================
// CoordinatorHandle
// ============================================================================

/// Cloneable entry point to a running coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Inbound>,
    snapshot: watch::Receiver<StateSnapshot>,
    commands: broadcast::Sender<Command>,
}

impl CoordinatorHandle {
    /// Sends a transition event.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorError::Closed` if the coordinator has stopped.
    pub fn send(&self, event: TransitionEvent) -> Result<(), CoordinatorError> {
        self.post(Inbound::Event(event))
    }

    /// Records a signal sample taken now.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorError::Closed` if the coordinator has stopped.
    pub fn record_sample(&self, device_id: DeviceId, strength: Option<i16>) -> Result<(), CoordinatorError> {
        self.record_sample_at(device_id, strength, Instant::now())
    }

    /// Records a signal sample taken at `at`.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorError::Closed` if the coordinator has stopped.
    pub fn record_sample_at(
        &self,
        device_id: DeviceId,
        strength: Option<i16>,
        at: Instant,
    ) -> Result<(), CoordinatorError> {
        self.post(Inbound::Sample {
            device_id,
            strength,
            at,
        })
    }

    /// Records that a device is connected but unmeasurable.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorError::Closed` if the coordinator has stopped.
    pub fn record_connected(&self, device_id: DeviceId) -> Result<(), CoordinatorError> {
        self.post(Inbound::Connected {
            device_id,
            at: Instant::now(),
        })
    }

    /// Applies a configuration change and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns the validation error, or `CoordinatorError::Closed`.
    pub async fn configure(&self, update: ConfigUpdate) -> Result<(), CoordinatorError> {
        let (reply, result) = oneshot::channel();
        self.post(Inbound::Configure {
            update,
            reply: Some(reply),
        })?;
        result.await.map_err(|_| CoordinatorError::Closed)?
    }

    /// Waits until every message sent so far has been processed.
    ///
    /// Returns false if the coordinator has stopped.
    pub async fn settle(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.post(Inbound::Barrier(tx)).is_err() {
            return false;
        }
        rx.await.is_ok()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribes to state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribes to the command feed.
    pub fn commands(&self) -> broadcast::Receiver<Command> {
        self.commands.subscribe()
    }

    /// Asks the coordinator to stop after the messages already queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Inbound::Shutdown);
    }

    /// Returns true once the coordinator has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn post(&self, message: Inbound) -> Result<(), CoordinatorError> {
        self.tx.send(message).map_err(|_| CoordinatorError::Closed)
    }
}

impl EventSink for CoordinatorHandle {
    fn emit(&self, event: TransitionEvent) -> bool {
        self.send(event).is_ok()
    }
}

// ============================================================================
// AlarmCoordinator
// ============================================================================

/// Owner of the alarm state, the proximity tracker and the active timer.
pub struct AlarmCoordinator {
    machine: AlarmMachine,
    tracker: ProximityTracker,
    timer: EscalationTimer<Inbound>,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    snapshot: watch::Sender<StateSnapshot>,
    commands: broadcast::Sender<Command>,
    dispatcher: Option<DispatcherHandle>,
    sweep_interval: Duration,
}

impl AlarmCoordinator {
    /// Creates a coordinator and its handle.
    ///
    /// # Errors
    ///
    /// Returns an error if any part of the configuration is invalid.
    pub fn new(config: &GuardConfig) -> Result<(Self, CoordinatorHandle), CoordinatorError> {
        config
            .countdown
            .validate()
            .map_err(CoordinatorError::InvalidCountdown)?;
        config
            .policy
            .validate()
            .map_err(CoordinatorError::InvalidPolicy)?;
        let tracker = ProximityTracker::new(config.thresholds, config.devices.iter().cloned())?;
        config.validate().map_err(CoordinatorError::InvalidConfig)?;
        let machine = AlarmMachine::new(
            config.countdown,
            config.policy.clone(),
            config.auto_arm_on_leave,
        );

        let (tx, inbox) = mpsc::unbounded_channel();
        let (commands, _) = broadcast::channel(COMMAND_FEED_CAPACITY);
        let (snapshot, snapshot_rx) = watch::channel(StateSnapshot::default());

        let coordinator = Self {
            machine,
            tracker,
            timer: EscalationTimer::new(tx.downgrade()),
            inbox,
            snapshot,
            commands: commands.clone(),
            dispatcher: None,
            sweep_interval: config.sweep_interval(),
        };
        coordinator.publish();

        let handle = CoordinatorHandle {
            tx,
            snapshot: snapshot_rx,
            commands,
        };
        Ok((coordinator, handle))
    }

    /// Routes issued commands to a dispatcher.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: DispatcherHandle) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Spawns the coordinator loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until shut down or until every handle is dropped.
    pub async fn run(mut self) {
        let mut sweep = interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("アラームコーディネーターを開始しました");
        loop {
            tokio::select! {
                biased;

                message = self.inbox.recv() => match message {
                    Some(Inbound::Shutdown) | None => break,
                    Some(message) => self.handle(message),
                },
                _ = sweep.tick() => self.sweep(Instant::now()),
            }
            self.publish();
        }

        self.timer.cancel();
        info!("アラームコーディネーターを終了しました");
    }

    fn handle(&mut self, message: Inbound) {
        match message {
            Inbound::Event(event) => self.process(event),
            Inbound::Sample {
                device_id,
                strength,
                at,
            } => match self.tracker.record_sample(&device_id, strength, at) {
                Ok(signals) => self.process_signals(signals),
                Err(e) => debug!("サンプルを無視します: {}", e),
            },
            Inbound::Connected { device_id, at } => {
                match self.tracker.record_connected(&device_id, at) {
                    Ok(signals) => self.process_signals(signals),
                    Err(e) => debug!("接続通知を無視します: {}", e),
                }
            }
            Inbound::Configure { update, reply } => {
                let result = self.configure(update);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Inbound::Expired(expiry) => {
                let event = match expiry.kind {
                    TimerKind::Countdown => TransitionEvent::CountdownExpired(expiry.generation),
                    TimerKind::Grace => TransitionEvent::GraceExpired(expiry.generation),
                };
                self.process(event);
            }
            Inbound::Barrier(done) => {
                let _ = done.send(());
            }
            Inbound::Shutdown => {}
        }
    }

    /// Runs one event through the state machine.
    fn process(&mut self, event: TransitionEvent) {
        let expiry = match &event {
            TransitionEvent::CountdownExpired(generation) => Some((TimerKind::Countdown, *generation)),
            TransitionEvent::GraceExpired(generation) => Some((TimerKind::Grace, *generation)),
            _ => None,
        };
        if let Some((kind, generation)) = expiry {
            if !self.timer.accept_expiry(&TimerExpiry { kind, generation }) {
                return;
            }
        }

        let effects = self.machine.apply(&event);
        self.perform(effects);
    }

    fn process_signals(&mut self, signals: Vec<ProximitySignal>) {
        for signal in signals {
            if let ProximitySignal::DeviceAway(id) = &signal {
                info!("デバイスが離れました: {}", id);
            }
            if let Some(event) = signal.into_event() {
                self.process(event);
            }
        }
    }

    fn perform(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartTimer(kind) => {
                    let duration = match kind {
                        TimerKind::Countdown => self.machine.countdown().trigger_duration(),
                        TimerKind::Grace => self.machine.countdown().grace_duration(),
                    };
                    self.timer.start(kind, duration);
                }
                Effect::CancelTimer => {
                    self.timer.cancel();
                }
                Effect::Command(command) => self.issue(command),
            }
        }
    }

    fn issue(&self, command: Command) {
        debug!("コマンド発行: {}", command.name());
        let _ = self.commands.send(command.clone());
        if let Some(dispatcher) = &self.dispatcher {
            if !dispatcher.dispatch(command) {
                debug!("ディスパッチャーが停止しています");
            }
        }
    }

    fn configure(&mut self, update: ConfigUpdate) -> Result<(), CoordinatorError> {
        match update {
            ConfigUpdate::AddDevice(spec) => {
                let signals = self.tracker.add_device(spec)?;
                self.process_signals(signals);
            }
            ConfigUpdate::RemoveDevice(id) => {
                let signals = self.tracker.remove_device(&id)?;
                self.process_signals(signals);
                // Auto-arm needs at least one trusted device.
                if self.tracker.is_empty() {
                    let effects = self.machine.cancel_grace();
                    self.perform(effects);
                }
            }
            ConfigUpdate::SetThresholds(thresholds) => self.tracker.set_thresholds(thresholds)?,
            ConfigUpdate::SetCountdown(countdown) => {
                countdown
                    .validate()
                    .map_err(CoordinatorError::InvalidCountdown)?;
                self.machine.set_countdown(countdown);
            }
            ConfigUpdate::SetAutoArmOnLeave(enabled) => {
                let effects = self.machine.set_auto_arm_on_leave(enabled);
                self.perform(effects);
            }
            ConfigUpdate::SetPolicy(policy) => {
                policy.validate().map_err(CoordinatorError::InvalidPolicy)?;
                let effects = self.machine.set_policy(policy);
                self.perform(effects);
            }
        }
        Ok(())
    }

    fn sweep(&mut self, now: Instant) {
        let signals = self.tracker.evaluate(now);
        self.process_signals(signals);
    }

    fn publish(&self) {
        let next = StateSnapshot {
            state: self.machine.state(),
            grace_pending: self.machine.grace_pending(),
            timer: self.timer.snapshot(Instant::now()),
            failed_auth_attempts: self.machine.failed_auth_attempts(),
            last_trigger: self.machine.last_trigger(),
            any_device_near: self.tracker.any_device_near(),
            devices: self.tracker.statuses(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
