//! Alarm state machine.
//!
//! This module holds the pure transition function:
//! - Idle → Armed → Triggered → Alarming escalation
//! - Auto-arm grace handling while idle
//! - Failed authentication bookkeeping
//!
//! It owns no timers and performs no I/O. Every accepted event returns the
//! list of [`Effect`]s the coordinator must carry out, in order.

use tracing::{debug, info};

use crate::types::{
    AlarmState, Command, CountdownConfig, EscalationPolicy, TimerKind, TransitionEvent,
    TriggerSource,
};

// ============================================================================
// Effect
// ============================================================================

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Start (or restart) the single-shot timer of this kind
    StartTimer(TimerKind),
    /// Cancel the active timer
    CancelTimer,
    /// Issue a command to the effectors
    Command(Command),
}

// ============================================================================
// AlarmMachine
// ============================================================================

/// The security state and the rules that move it.
#[derive(Debug, Clone)]
pub struct AlarmMachine {
    state: AlarmState,
    grace_pending: bool,
    auto_arm_on_leave: bool,
    countdown: CountdownConfig,
    policy: EscalationPolicy,
    failed_auth_attempts: u32,
    last_trigger: Option<TriggerSource>,
}

impl AlarmMachine {
    /// Creates an idle machine.
    pub fn new(countdown: CountdownConfig, policy: EscalationPolicy, auto_arm_on_leave: bool) -> Self {
        Self {
            state: AlarmState::Idle,
            grace_pending: false,
            auto_arm_on_leave,
            countdown,
            policy,
            failed_auth_attempts: 0,
            last_trigger: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> AlarmState {
        self.state
    }

    /// Idle with the grace timer running.
    pub fn grace_pending(&self) -> bool {
        self.grace_pending
    }

    /// Failed auth attempts during the current escalation.
    pub fn failed_auth_attempts(&self) -> u32 {
        self.failed_auth_attempts
    }

    /// Trigger of the current escalation.
    pub fn last_trigger(&self) -> Option<TriggerSource> {
        self.last_trigger
    }

    /// Auto-arm toggle.
    pub fn auto_arm_on_leave(&self) -> bool {
        self.auto_arm_on_leave
    }

    /// Countdown durations.
    pub fn countdown(&self) -> &CountdownConfig {
        &self.countdown
    }

    /// Escalation policy.
    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    /// Applies one event and returns the effects to perform.
    ///
    /// Pairs outside the transition table leave the machine untouched and
    /// return no effects.
    pub fn apply(&mut self, event: &TransitionEvent) -> Vec<Effect> {
        use AlarmState::*;
        use TransitionEvent as E;

        let from = self.state;
        let effects = match (from, event) {
            // Idle
            (Idle, E::UserArm) => {
                let mut effects = self.take_grace();
                effects.extend(self.arm());
                effects
            }
            (Idle, E::AllDevicesAway) if self.auto_arm_on_leave && !self.grace_pending => {
                self.grace_pending = true;
                vec![Effect::StartTimer(TimerKind::Grace)]
            }
            (Idle, E::GraceExpired(_)) if self.grace_pending => {
                self.grace_pending = false;
                self.arm()
            }
            (Idle, E::DeviceNear(_) | E::UserDisarm) if self.grace_pending => self.take_grace(),

            // Armed
            (Armed, E::UserDisarm | E::DeviceNear(_)) => self.disarm(),
            (Armed, trigger) => match trigger.trigger_source() {
                Some(source) if self.policy.is_enabled(source) => self.trigger(source),
                _ => Vec::new(),
            },

            // Triggered
            (Triggered, E::AuthSucceeded) => {
                self.state = Armed;
                self.clear_escalation();
                vec![
                    Effect::CancelTimer,
                    Effect::Command(Command::DismissEscalation),
                ]
            }
            (Triggered, E::CountdownExpired(_)) => {
                self.state = Alarming;
                vec![Effect::Command(Command::PlayAlarm {
                    sound: self.policy.alarm_sound.clone(),
                    volume: self.policy.alarm_volume,
                })]
            }
            (Triggered, E::DeviceNear(_) | E::UserDisarm) => {
                let mut effects = vec![
                    Effect::CancelTimer,
                    Effect::Command(Command::DismissEscalation),
                ];
                effects.extend(self.disarm());
                effects
            }

            // Alarming
            (Alarming, E::AuthSucceeded | E::DeviceNear(_) | E::UserDisarm) => {
                let mut effects = vec![
                    Effect::Command(Command::StopAlarm),
                    Effect::Command(Command::DismissEscalation),
                ];
                effects.extend(self.disarm());
                effects
            }

            (Triggered | Alarming, E::AuthFailed(reason)) => {
                self.failed_auth_attempts = self.failed_auth_attempts.saturating_add(1);
                vec![Effect::Command(Command::AuthRetry { reason: *reason })]
            }

            _ => Vec::new(),
        };

        if self.state != from {
            info!("状態遷移: {} → {} ({})", from, self.state, event.name());
        } else if effects.is_empty() {
            debug!("無視されたイベント: {} (状態: {})", event.name(), from);
        }

        effects
    }

    /// Turns auto-arm on or off. Turning it off cancels a pending grace.
    pub fn set_auto_arm_on_leave(&mut self, enabled: bool) -> Vec<Effect> {
        self.auto_arm_on_leave = enabled;
        if enabled {
            Vec::new()
        } else {
            self.take_grace()
        }
    }

    /// Drops a pending auto-arm, e.g. when no trusted device is left.
    pub fn cancel_grace(&mut self) -> Vec<Effect> {
        self.take_grace()
    }

    /// Replaces the countdown durations. Running timers keep their deadline.
    pub fn set_countdown(&mut self, countdown: CountdownConfig) {
        self.countdown = countdown;
    }

    /// Replaces the escalation policy.
    ///
    /// While guarding, the running monitor set is reconciled with the new
    /// policy.
    pub fn set_policy(&mut self, policy: EscalationPolicy) -> Vec<Effect> {
        let sources_changed = policy.enabled_sources() != self.policy.enabled_sources();
        self.policy = policy;

        if self.state.is_guarding() && sources_changed {
            vec![Effect::Command(Command::StartMonitors {
                sources: self.policy.enabled_sources(),
            })]
        } else {
            Vec::new()
        }
    }

    fn arm(&mut self) -> Vec<Effect> {
        self.state = AlarmState::Armed;

        let mut effects = vec![
            Effect::Command(Command::StartMonitors {
                sources: self.policy.enabled_sources(),
            }),
            Effect::Command(Command::PreventSleep),
        ];
        if self.policy.lock_screen_on_arm {
            effects.push(Effect::Command(Command::LockScreen));
        }
        effects
    }

    fn trigger(&mut self, source: TriggerSource) -> Vec<Effect> {
        self.state = AlarmState::Triggered;
        self.last_trigger = Some(source);
        self.failed_auth_attempts = 0;

        vec![
            Effect::StartTimer(TimerKind::Countdown),
            Effect::Command(Command::ShowEscalation {
                source,
                seconds: self.countdown.trigger_seconds,
            }),
        ]
    }

    fn disarm(&mut self) -> Vec<Effect> {
        self.state = AlarmState::Idle;
        self.clear_escalation();
        vec![
            Effect::Command(Command::StopMonitors),
            Effect::Command(Command::RestoreSleepPolicy),
        ]
    }

    fn take_grace(&mut self) -> Vec<Effect> {
        if std::mem::take(&mut self.grace_pending) {
            debug!("自動アームの猶予をキャンセルします");
            vec![Effect::CancelTimer]
        } else {
            Vec::new()
        }
    }

    fn clear_escalation(&mut self) {
        self.last_trigger = None;
        self.failed_auth_attempts = 0;
    }
}

// ============================================================================
// Tests
// ============================================================================
