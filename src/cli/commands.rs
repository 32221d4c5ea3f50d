//! Command definitions for the theftguard CLI.
//!
//! Uses clap derive macro for argument parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::types::{TransportKind, TriggerSource};

// ============================================================================
// CLI Structure
// ============================================================================

/// theftguard - anti-theft alarm for laptops
#[derive(Parser, Debug)]
#[command(
    name = "theftguard",
    version,
    about = "ノートPC向け盗難防止アラーム",
    long_about = "離席中のノートPCを見張る盗難防止アラーム。\n\
                  信頼済みデバイスが離れると自動で警備を開始し、\n\
                  入力・蓋の開閉・電源の抜き差しを検知すると警報を鳴らします。",
    propagate_version = true
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Daemon socket path (defaults to ~/.theftguard/theftguard.sock)
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,
}

// ============================================================================
// Subcommands
// ============================================================================

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start guarding
    Arm,

    /// Stop guarding (asks for authentication while escalated)
    Disarm(AuthArgs),

    /// Authenticate to cancel an escalation and keep guarding
    Auth(AuthArgs),

    /// Show current status
    Status,

    /// Report a signal sample for a trusted device
    Sample(SampleArgs),

    /// Report a trigger observed outside the daemon
    Trigger {
        /// Trigger source (input, lid, power)
        source: TriggerSource,
    },

    /// Manage trusted devices
    Device {
        /// Device operation
        #[command(subcommand)]
        action: DeviceCommands,
    },

    /// Run as daemon (background service)
    #[command(hide = true)]
    Daemon {
        /// Config file path (defaults to ~/.theftguard/config.json)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell type for completion script
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Trusted device operations
#[derive(Subcommand, Debug, Clone)]
pub enum DeviceCommands {
    /// Add a trusted device
    Add {
        /// Stable device id (e.g. Bluetooth address)
        id: String,

        /// Display name
        #[arg(value_parser = validate_device_name)]
        name: String,

        /// Transport kind (classic, low_energy)
        #[arg(short, long, default_value = "low_energy")]
        kind: TransportKind,
    },

    /// Remove a trusted device
    Remove {
        /// Device id
        id: String,
    },
}

// ============================================================================
// Command Arguments
// ============================================================================

/// Arguments for commands that may need authentication
#[derive(Args, Debug, Clone, Default)]
pub struct AuthArgs {
    /// PIN (biometrics are used when omitted)
    #[arg(short, long, value_parser = validate_pin)]
    pub pin: Option<String>,
}

/// Arguments for the sample command
#[derive(Args, Debug, Clone)]
pub struct SampleArgs {
    /// Device id
    pub device: String,

    /// Signal strength in dBm
    #[arg(
        short,
        long,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i16).range(-127..=20)
    )]
    pub rssi: Option<i16>,

    /// The device is connected even if its strength is unknown
    #[arg(short, long)]
    pub connected: bool,
}

// ============================================================================
// Validation Functions
// ============================================================================

/// Validates a PIN: 4 or more ASCII digits.
fn validate_pin(s: &str) -> Result<String, String> {
    if s.len() < 4 || !s.chars().all(|c| c.is_ascii_digit()) {
        return Err("PINは4桁以上の数字で指定してください".to_string());
    }
    Ok(s.to_string())
}

/// Validates a device display name.
///
/// - Must not be empty
/// - Must not exceed 64 characters
fn validate_device_name(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        return Err("デバイス名は空にできません".to_string());
    }
    if s.chars().count() > 64 {
        return Err("デバイス名は64文字以内にしてください".to_string());
    }
    Ok(s.to_string())
}

// ============================================================================
// Tests
// ============================================================================
