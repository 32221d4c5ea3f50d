//! Escalation timers for the alarm coordinator.
//!
//! This module provides the countdown and grace timers:
//! - At most one timer is active at a time
//! - Starting a timer cancels the previous one
//! - Every expiry carries the generation it was scheduled with, and only the
//!   active generation is accepted
//!
//! Expiries are delivered through a weak sender so a pending timer never
//! keeps the coordinator's inbox open by itself.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::debug;

use crate::types::{TimerGeneration, TimerKind, TimerSnapshot};

// ============================================================================
// TimerExpiry
// ============================================================================

/// Message sent when a scheduled timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerExpiry {
    /// Which timer fired
    pub kind: TimerKind,
    /// Generation it was scheduled with
    pub generation: TimerGeneration,
}

// ============================================================================
// EscalationTimer
// ============================================================================

#[derive(Debug)]
struct ActiveTimer {
    kind: TimerKind,
    generation: TimerGeneration,
    deadline: Instant,
    handle: JoinHandle<()>,
}

/// Owner of the single active countdown/grace timer.
#[derive(Debug)]
pub struct EscalationTimer<M> {
    next_generation: u64,
    active: Option<ActiveTimer>,
    expiry_tx: mpsc::WeakUnboundedSender<M>,
}

impl<M> EscalationTimer<M>
where
    M: From<TimerExpiry> + Send + 'static,
{
    /// Creates a timer that reports expiries to `expiry_tx`.
    pub fn new(expiry_tx: mpsc::WeakUnboundedSender<M>) -> Self {
        Self {
            next_generation: 0,
            active: None,
            expiry_tx,
        }
    }

    /// Starts a timer of `kind`, cancelling any active one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, kind: TimerKind, duration: Duration) -> TimerGeneration {
        self.cancel();

        self.next_generation += 1;
        let generation = TimerGeneration(self.next_generation);
        let deadline = Instant::now() + duration;

        let tx = self.expiry_tx.clone();
        let handle = tokio::spawn(async move {
            sleep_until(deadline).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(M::from(TimerExpiry { kind, generation }));
            }
        });

        debug!("タイマー開始: {:?} {} ({}ms)", kind, generation, duration.as_millis());
        self.active = Some(ActiveTimer {
            kind,
            generation,
            deadline,
            handle,
        });
        generation
    }

    /// Cancels the active timer, returning its generation.
    ///
    /// An expiry already in flight is rejected later by
    /// [`accept_expiry`](Self::accept_expiry).
    pub fn cancel(&mut self) -> Option<TimerGeneration> {
        let active = self.active.take()?;
        active.handle.abort();
        debug!("タイマー停止: {:?} {}", active.kind, active.generation);
        Some(active.generation)
    }

    /// Consumes an expiry if it belongs to the active timer.
    ///
    /// Returns false for stale generations and mismatched kinds; the active
    /// timer is left untouched in that case.
    pub fn accept_expiry(&mut self, expiry: &TimerExpiry) -> bool {
        match &self.active {
            Some(active) if active.kind == expiry.kind && active.generation == expiry.generation => {
                self.active = None;
                true
            }
            _ => {
                debug!(
                    "古いタイマー満了を無視します: {:?} {}",
                    expiry.kind, expiry.generation
                );
                false
            }
        }
    }

    /// Kind of the active timer.
    pub fn active_kind(&self) -> Option<TimerKind> {
        self.active.as_ref().map(|a| a.kind)
    }

    /// Generation of the active timer.
    pub fn active_generation(&self) -> Option<TimerGeneration> {
        self.active.as_ref().map(|a| a.generation)
    }

    /// Remaining time of the active timer at `now`.
    pub fn snapshot(&self, now: Instant) -> Option<TimerSnapshot> {
        self.active.as_ref().map(|a| TimerSnapshot {
            kind: a.kind,
            remaining_ms: a.deadline.saturating_duration_since(now).as_millis() as u64,
        })
    }
}

impl<M> Drop for EscalationTimer<M> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
