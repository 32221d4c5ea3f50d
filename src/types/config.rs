//! Configuration types.
//!
//! Configuration is persisted externally as JSON and injected into the
//! coordinator at startup and on change.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{DeviceId, TransportKind, TriggerSource};

/// Maximum number of trusted devices tracked at once.
pub const MAX_TRUSTED_DEVICES: usize = 10;

/// Default config file location, relative to the home directory.
const DEFAULT_CONFIG_PATH: &str = ".theftguard/config.json";

// ============================================================================
// CountdownConfig
// ============================================================================

/// Escalation and auto-arm timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountdownConfig {
    /// Trigger-to-alarm duration in seconds (1-60)
    #[serde(rename = "triggerSeconds")]
    pub trigger_seconds: u32,
    /// Auto-arm grace period in seconds (10-60)
    #[serde(rename = "graceSeconds")]
    pub grace_seconds: u32,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            trigger_seconds: 3,
            grace_seconds: 30,
        }
    }
}

impl CountdownConfig {
    /// Trigger-to-alarm duration.
    pub fn trigger_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.trigger_seconds))
    }

    /// Auto-arm grace duration.
    pub fn grace_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.grace_seconds))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.trigger_seconds < 1 || self.trigger_seconds > 60 {
            return Err("カウントダウンは1-60秒の範囲で指定してください".to_string());
        }
        if self.grace_seconds < 10 || self.grace_seconds > 60 {
            return Err("猶予時間は10-60秒の範囲で指定してください".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// ProximityThresholds
// ============================================================================

/// Hysteresis and debounce parameters for proximity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityThresholds {
    /// Readings at or above this are near (dBm)
    #[serde(rename = "nearThreshold")]
    pub near_threshold: i16,
    /// Readings at or below this are away candidates (dBm)
    #[serde(rename = "awayThreshold")]
    pub away_threshold: i16,
    /// A device without a valid sample for this long has no information
    #[serde(rename = "sampleStaleAfterMs")]
    pub sample_stale_after_ms: u64,
    /// How long a device must stay weak or unsampled before it is away
    #[serde(rename = "confirmAwayAfterMs")]
    pub confirm_away_after_ms: u64,
    /// Reading assumed for a connected device that reports no strength.
    /// `None` treats such samples as absent.
    #[serde(rename = "connectedFallbackStrength")]
    pub connected_fallback_strength: Option<i16>,
}

impl Default for ProximityThresholds {
    fn default() -> Self {
        Self {
            near_threshold: -60,
            away_threshold: -75,
            sample_stale_after_ms: 10_000,
            confirm_away_after_ms: 8_000,
            connected_fallback_strength: Some(-50),
        }
    }
}

impl ProximityThresholds {
    /// Staleness window as a duration.
    pub fn sample_stale_after(&self) -> Duration {
        Duration::from_millis(self.sample_stale_after_ms)
    }

    /// Away confirmation window as a duration.
    pub fn confirm_away_after(&self) -> Duration {
        Duration::from_millis(self.confirm_away_after_ms)
    }

    /// Validates the thresholds.
    pub fn validate(&self) -> Result<(), String> {
        if self.away_threshold >= self.near_threshold {
            return Err(format!(
                "離脱しきい値({})は接近しきい値({})より小さくしてください",
                self.away_threshold, self.near_threshold
            ));
        }
        if self.sample_stale_after_ms == 0 {
            return Err("サンプル失効時間は0より大きくしてください".to_string());
        }
        if self.confirm_away_after_ms == 0 {
            return Err("離脱確定時間は0より大きくしてください".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// EscalationPolicy
// ============================================================================

/// What arming and alarming actually do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
    /// Lock the screen when arming
    #[serde(rename = "lockScreenOnArm")]
    pub lock_screen_on_arm: bool,
    /// Siren sound name
    #[serde(rename = "alarmSound")]
    pub alarm_sound: String,
    /// Siren volume (0.0-1.0)
    #[serde(rename = "alarmVolume")]
    pub alarm_volume: f32,
    /// Trigger on keyboard/mouse activity
    #[serde(rename = "monitorInput")]
    pub monitor_input: bool,
    /// Trigger on lid close
    #[serde(rename = "monitorLid")]
    pub monitor_lid: bool,
    /// Trigger on power disconnect
    #[serde(rename = "monitorPower")]
    pub monitor_power: bool,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            lock_screen_on_arm: false,
            alarm_sound: "siren".to_string(),
            alarm_volume: 1.0,
            monitor_input: true,
            monitor_lid: true,
            monitor_power: true,
        }
    }
}

impl EscalationPolicy {
    /// Returns true if the given trigger source is enabled.
    pub fn is_enabled(&self, source: TriggerSource) -> bool {
        match source {
            TriggerSource::Input => self.monitor_input,
            TriggerSource::Lid => self.monitor_lid,
            TriggerSource::Power => self.monitor_power,
        }
    }

    /// Returns the enabled trigger sources.
    pub fn enabled_sources(&self) -> Vec<TriggerSource> {
        TriggerSource::ALL
            .into_iter()
            .filter(|source| self.is_enabled(*source))
            .collect()
    }

    /// Validates the policy.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.alarm_volume) {
            return Err("音量は0.0-1.0の範囲で指定してください".to_string());
        }
        if self.alarm_sound.trim().is_empty() {
            return Err("アラーム音の名前は空にできません".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// DeviceSpec
// ============================================================================

/// A persisted trusted device entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Stable device id
    pub id: DeviceId,
    /// Display name
    pub name: String,
    /// Transport kind
    #[serde(default)]
    pub kind: TransportKind,
}

impl DeviceSpec {
    /// Creates a device entry.
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            id: DeviceId::new(id),
            name: name.into(),
            kind,
        }
    }
}

// ============================================================================
// GuardConfig
// ============================================================================

/// Complete configuration injected into the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Escalation timing
    pub countdown: CountdownConfig,
    /// Proximity hysteresis
    pub thresholds: ProximityThresholds,
    /// Trusted devices
    pub devices: Vec<DeviceSpec>,
    /// Auto-arm when every trusted device leaves
    #[serde(rename = "autoArmOnLeave")]
    pub auto_arm_on_leave: bool,
    /// Escalation policy
    pub policy: EscalationPolicy,
    /// Disarm PIN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    /// Upper bound for a single effector command
    #[serde(rename = "effectorTimeoutMs")]
    pub effector_timeout_ms: u64,
    /// Proximity re-evaluation period
    #[serde(rename = "sweepIntervalMs")]
    pub sweep_interval_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            countdown: CountdownConfig::default(),
            thresholds: ProximityThresholds::default(),
            devices: Vec::new(),
            auto_arm_on_leave: false,
            policy: EscalationPolicy::default(),
            pin: None,
            effector_timeout_ms: 2_000,
            sweep_interval_ms: 1_000,
        }
    }
}

impl GuardConfig {
    /// Returns the default config file path.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("ホームディレクトリが見つかりません")?;
        Ok(home.join(DEFAULT_CONFIG_PATH))
    }

    /// Loads the configuration from a JSON file.
    ///
    /// A missing file yields the default configuration.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("設定ファイルがないためデフォルト設定を使用します: {:?}", path);
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("設定ファイルを読み込めません: {:?}", path))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("設定ファイルのパースに失敗しました: {:?}", path))?;

        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Writes the configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("設定ディレクトリを作成できません: {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self).context("設定のシリアライズに失敗しました")?;
        std::fs::write(path, json)
            .with_context(|| format!("設定ファイルを書き込めません: {:?}", path))?;
        Ok(())
    }

    /// Effector timeout as a duration.
    pub fn effector_timeout(&self) -> Duration {
        Duration::from_millis(self.effector_timeout_ms)
    }

    /// Sweep interval as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Validates the whole configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.countdown.validate()?;
        self.thresholds.validate()?;
        self.policy.validate()?;

        if self.devices.len() > MAX_TRUSTED_DEVICES {
            return Err(format!(
                "信頼済みデバイスは最大{}台までです",
                MAX_TRUSTED_DEVICES
            ));
        }
        if self.effector_timeout_ms == 0 || self.sweep_interval_ms == 0 {
            return Err("タイムアウトと評価間隔は0より大きくしてください".to_string());
        }
        if let Some(pin) = &self.pin {
            if pin.len() < 4 || !pin.chars().all(|c| c.is_ascii_digit()) {
                return Err("PINは4桁以上の数字で指定してください".to_string());
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
