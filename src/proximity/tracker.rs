//! Proximity tracker: per-device debounce plus the aggregate fold.

use std::collections::BTreeMap;

use tokio::time::Instant;
use tracing::{debug, info};

use super::device::TrustedDevice;
use super::error::ProximityError;
use super::ProximitySignal;
use crate::types::config::MAX_TRUSTED_DEVICES;
use crate::types::{DeviceId, DeviceSpec, DeviceStatus, Proximity, ProximityThresholds};

/// Tracks trusted devices and emits proximity edges.
///
/// Only edges are emitted: `DeviceNear` when a device goes `Away → Near`,
/// `DeviceAway` for the opposite, and `AllDevicesAway` when the aggregate
/// "every device is away" goes from false to true. With no devices the
/// aggregate is never true, so nothing is ever emitted.
#[derive(Debug)]
pub struct ProximityTracker {
    thresholds: ProximityThresholds,
    devices: BTreeMap<DeviceId, TrustedDevice>,
    all_away: bool,
}

impl ProximityTracker {
    /// Creates a tracker with the given devices.
    ///
    /// The initial aggregate is primed without emitting an edge, so startup
    /// with every device away does not auto-arm by itself.
    pub fn new(
        thresholds: ProximityThresholds,
        devices: impl IntoIterator<Item = DeviceSpec>,
    ) -> Result<Self, ProximityError> {
        thresholds
            .validate()
            .map_err(ProximityError::InvalidThresholds)?;

        let mut tracker = Self {
            thresholds,
            devices: BTreeMap::new(),
            all_away: false,
        };
        for spec in devices {
            tracker.insert(spec)?;
        }
        tracker.all_away = tracker.all_devices_away();
        Ok(tracker)
    }

    /// Records a signal sample for a device.
    ///
    /// `strength` is `None` when the sensor reported no reading.
    pub fn record_sample(
        &mut self,
        id: &DeviceId,
        strength: Option<i16>,
        at: Instant,
    ) -> Result<Vec<ProximitySignal>, ProximityError> {
        let thresholds = self.thresholds;
        let device = self
            .devices
            .get_mut(id)
            .ok_or_else(|| ProximityError::UnknownDevice(id.clone()))?;

        let mut signals = Vec::new();
        if let Some(changed) = device.apply(strength, at, &thresholds) {
            signals.push(edge(id, changed));
        }
        self.refold(&mut signals);
        Ok(signals)
    }

    /// Records that a device is connected but its strength is unmeasurable.
    ///
    /// Applies the configured fallback reading, or behaves like a missing
    /// sample when no fallback is configured.
    pub fn record_connected(
        &mut self,
        id: &DeviceId,
        at: Instant,
    ) -> Result<Vec<ProximitySignal>, ProximityError> {
        let fallback = self.thresholds.connected_fallback_strength;
        self.record_sample(id, fallback, at)
    }

    /// Re-evaluates every device against the stale and away windows.
    pub fn evaluate(&mut self, now: Instant) -> Vec<ProximitySignal> {
        let thresholds = self.thresholds;
        let mut signals = Vec::new();
        for (id, device) in self.devices.iter_mut() {
            if let Some(changed) = device.evaluate(now, &thresholds) {
                signals.push(edge(id, changed));
            }
        }
        self.refold(&mut signals);
        signals
    }

    /// Adds a trusted device. A new device starts `Away`.
    pub fn add_device(&mut self, spec: DeviceSpec) -> Result<Vec<ProximitySignal>, ProximityError> {
        info!("信頼済みデバイスを追加します: {} ({})", spec.name, spec.id);
        self.insert(spec)?;
        let mut signals = Vec::new();
        self.refold(&mut signals);
        Ok(signals)
    }

    /// Removes a trusted device.
    pub fn remove_device(&mut self, id: &DeviceId) -> Result<Vec<ProximitySignal>, ProximityError> {
        self.devices
            .remove(id)
            .ok_or_else(|| ProximityError::UnknownDevice(id.clone()))?;
        info!("信頼済みデバイスを削除しました: {}", id);

        let mut signals = Vec::new();
        self.refold(&mut signals);
        Ok(signals)
    }

    /// Replaces the thresholds. Classifications are kept as they are.
    pub fn set_thresholds(&mut self, thresholds: ProximityThresholds) -> Result<(), ProximityError> {
        thresholds
            .validate()
            .map_err(ProximityError::InvalidThresholds)?;
        self.thresholds = thresholds;
        Ok(())
    }

    /// Current thresholds.
    pub fn thresholds(&self) -> &ProximityThresholds {
        &self.thresholds
    }

    /// Returns true if no devices are tracked.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Number of tracked devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns a tracked device.
    pub fn device(&self, id: &DeviceId) -> Option<&TrustedDevice> {
        self.devices.get(id)
    }

    /// OR over `Near`.
    pub fn any_device_near(&self) -> bool {
        self.devices
            .values()
            .any(|d| d.proximity() == Proximity::Near)
    }

    /// Non-empty AND over `Away`.
    pub fn all_devices_away(&self) -> bool {
        !self.devices.is_empty()
            && self
                .devices
                .values()
                .all(|d| d.proximity() == Proximity::Away)
    }

    /// UI view of every device, ordered by id.
    pub fn statuses(&self) -> Vec<DeviceStatus> {
        self.devices.values().map(TrustedDevice::status).collect()
    }

    fn insert(&mut self, spec: DeviceSpec) -> Result<(), ProximityError> {
        if self.devices.contains_key(&spec.id) {
            return Err(ProximityError::DuplicateDevice(spec.id));
        }
        if self.devices.len() >= MAX_TRUSTED_DEVICES {
            return Err(ProximityError::TooManyDevices(MAX_TRUSTED_DEVICES));
        }
        self.devices.insert(spec.id.clone(), TrustedDevice::new(spec));
        Ok(())
    }

    fn refold(&mut self, signals: &mut Vec<ProximitySignal>) {
        let all_away = self.all_devices_away();
        if all_away && !self.all_away {
            debug!("全ての信頼済みデバイスが離脱しました");
            signals.push(ProximitySignal::AllDevicesAway);
        }
        self.all_away = all_away;
    }
}

fn edge(id: &DeviceId, proximity: Proximity) -> ProximitySignal {
    match proximity {
        Proximity::Near => ProximitySignal::DeviceNear(id.clone()),
        Proximity::Away => ProximitySignal::DeviceAway(id.clone()),
    }
}
