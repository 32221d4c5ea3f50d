//! Per-device signal history and debounced classification.

use tokio::time::Instant;

use crate::types::{DeviceId, DeviceSpec, DeviceStatus, Proximity, ProximityThresholds, TransportKind};

/// A trusted device and its signal history.
///
/// Classification is asymmetric: a strong reading flips the device to
/// `Near` at once, while `Away` needs a weak or missing signal to persist for
/// `confirm_away_after`.
#[derive(Debug, Clone)]
pub struct TrustedDevice {
    /// Stable id
    pub id: DeviceId,
    /// Display name
    pub name: String,
    /// Transport kind
    pub kind: TransportKind,
    last_strength: Option<i16>,
    last_sample_at: Option<Instant>,
    /// Start of the current uninterrupted run of readings at or below the
    /// away threshold.
    weak_since: Option<Instant>,
    proximity: Proximity,
}

impl TrustedDevice {
    /// Creates a never-sampled device, classified `Away`.
    pub fn new(spec: DeviceSpec) -> Self {
        Self {
            id: spec.id,
            name: spec.name,
            kind: spec.kind,
            last_strength: None,
            last_sample_at: None,
            weak_since: None,
            proximity: Proximity::Away,
        }
    }

    /// Current classification.
    pub fn proximity(&self) -> Proximity {
        self.proximity
    }

    /// Last valid signal strength.
    pub fn last_strength(&self) -> Option<i16> {
        self.last_strength
    }

    /// Timestamp of the last valid sample.
    pub fn last_sample_at(&self) -> Option<Instant> {
        self.last_sample_at
    }

    /// Returns true if the last valid sample is older than the stale window.
    pub fn is_stale(&self, now: Instant, thresholds: &ProximityThresholds) -> bool {
        match self.last_sample_at {
            Some(at) => now.saturating_duration_since(at) >= thresholds.sample_stale_after(),
            None => true,
        }
    }

    /// Applies a sample and returns the classification if it changed.
    ///
    /// An absent strength never reclassifies on its own; the device is picked
    /// up by [`evaluate`](Self::evaluate) once its last valid sample goes stale.
    pub fn apply(
        &mut self,
        strength: Option<i16>,
        at: Instant,
        thresholds: &ProximityThresholds,
    ) -> Option<Proximity> {
        if self.last_sample_at.is_some_and(|last| at < last) {
            tracing::debug!("古いサンプルを無視します: {}", self.id);
            return None;
        }

        let Some(strength) = strength else {
            return self.evaluate(at, thresholds);
        };

        self.last_strength = Some(strength);
        self.last_sample_at = Some(at);

        if strength >= thresholds.near_threshold {
            self.weak_since = None;
            return self.set(Proximity::Near);
        }

        if strength <= thresholds.away_threshold {
            self.weak_since.get_or_insert(at);
        } else {
            // Dead zone: breaks the weak run, keeps the classification.
            self.weak_since = None;
        }

        self.evaluate(at, thresholds)
    }

    /// Re-evaluates a `Near` device against the away confirmation window.
    ///
    /// Returns the new classification if it changed.
    pub fn evaluate(&mut self, now: Instant, thresholds: &ProximityThresholds) -> Option<Proximity> {
        if self.proximity == Proximity::Away {
            return None;
        }

        let stale_since = self
            .last_sample_at
            .map(|at| at + thresholds.sample_stale_after())
            .filter(|stale_at| *stale_at <= now);

        let candidate_since = match (self.weak_since, stale_since) {
            (Some(weak), Some(stale)) => Some(weak.min(stale)),
            (weak, stale) => weak.or(stale),
        };

        match candidate_since {
            Some(since) if now.saturating_duration_since(since) >= thresholds.confirm_away_after() => {
                self.set(Proximity::Away)
            }
            _ => None,
        }
    }

    /// Returns the UI view of the device.
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            proximity: self.proximity,
            last_strength: self.last_strength,
        }
    }

    fn set(&mut self, proximity: Proximity) -> Option<Proximity> {
        if self.proximity == proximity {
            return None;
        }
        self.proximity = proximity;
        Some(proximity)
    }
}
