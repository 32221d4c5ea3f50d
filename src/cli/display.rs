//! Display utilities for the theftguard CLI.
//!
//! This module provides formatted output for:
//! - Success messages
//! - Error messages
//! - Status display

use crate::types::{DeviceStatus, IpcResponse, Proximity, StatusData};

// ============================================================================
// Display
// ============================================================================

/// Display utilities for CLI output.
pub struct Display;

impl Display {
    /// Shows the daemon's message followed by the resulting state.
    pub fn show_success(response: &IpcResponse) {
        if !response.message.is_empty() {
            println!("* {}", response.message);
        }
        if let Some(data) = &response.data {
            if let Some(state) = &data.state {
                println!("  状態: {}", Self::state_label(state));
            }
            if let Some(line) = Self::timer_line(data) {
                println!("  {}", line);
            }
        }
    }

    /// Shows the full status.
    pub fn show_status(response: &IpcResponse) {
        println!("theftguard ステータス");
        println!("─────────────────────────────");

        let Some(data) = &response.data else {
            println!("Daemonは起動していません");
            return;
        };

        let state = data.state.as_deref().unwrap_or("unknown");
        println!("状態: {}", Self::state_label(state));

        if let Some(line) = Self::timer_line(data) {
            println!("{}", line);
        }
        if let Some(source) = data.last_trigger {
            println!("検知元: {}", source);
        }
        if let Some(count) = data.failed_auth_attempts.filter(|c| *c > 0) {
            println!("認証失敗: {}回", count);
        }

        if data.devices.is_empty() {
            println!("信頼済みデバイス: なし");
        } else {
            println!("信頼済みデバイス:");
            for device in &data.devices {
                println!("  {}", Self::device_line(device));
            }
        }
    }

    /// Shows an error message.
    pub fn show_error(message: &str) {
        eprintln!("エラー: {}", message);
    }

    fn state_label(state: &str) -> &str {
        match state {
            "idle" => "待機中",
            "armed" => "警備中",
            "triggered" => "検知 (カウントダウン中)",
            "alarming" => "警報中",
            other => other,
        }
    }

    fn timer_line(data: &StatusData) -> Option<String> {
        let remaining = data.remaining_seconds?;
        let (minutes, seconds) = Self::format_time(remaining);
        let label = if data.grace_pending == Some(true) {
            "自動警備まで"
        } else {
            "警報まで"
        };
        Some(format!("{}: {}:{:02}", label, minutes, seconds))
    }

    fn device_line(device: &DeviceStatus) -> String {
        let proximity = match device.proximity {
            Proximity::Near => "近く",
            Proximity::Away => "離れている",
        };
        match device.last_strength {
            Some(strength) => format!(
                "{} ({}) - {} [{} dBm]",
                device.name, device.id, proximity, strength
            ),
            None => format!("{} ({}) - {}", device.name, device.id, proximity),
        }
    }

    /// Formats remaining seconds as (minutes, seconds).
    fn format_time(total_seconds: u64) -> (u64, u64) {
        (total_seconds / 60, total_seconds % 60)
    }
}

// ============================================================================
// Tests
// ============================================================================
