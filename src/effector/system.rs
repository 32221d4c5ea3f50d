//! Effector backed by the running machine.
//!
//! - Alarm through an [`AlarmPlayer`]
//! - Screen lock and sleep inhibition through OS commands
//! - Trigger monitors through the [`MonitorHub`]
//!
//! UI commands are accepted and ignored here; the UI layer observes the
//! coordinator's command feed instead.

use std::path::PathBuf;
use std::process::{Child, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use super::{Effector, EffectorError};
use crate::monitor::MonitorHub;
use crate::sound::{resolve_sound, sound_dirs, AlarmPlayer, SoundError};
use crate::types::Command;

/// Argument vectors of the OS commands the effector runs.
///
/// An empty vector disables the action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsCommands {
    /// Locks the screen and exits
    pub lock_screen: Vec<String>,
    /// Long-running process that blocks sleep while alive
    pub inhibit_sleep: Vec<String>,
}

impl Default for OsCommands {
    #[cfg(target_os = "macos")]
    fn default() -> Self {
        Self {
            lock_screen: argv(&["pmset", "displaysleepnow"]),
            inhibit_sleep: argv(&["caffeinate", "-i", "-s"]),
        }
    }

    #[cfg(not(target_os = "macos"))]
    fn default() -> Self {
        Self {
            lock_screen: argv(&["loginctl", "lock-session"]),
            inhibit_sleep: argv(&[
                "systemd-inhibit",
                "--what=sleep:handle-lid-switch",
                "--who=theftguard",
                "--why=盗難防止アラームが作動中",
                "--mode=block",
                "sleep",
                "infinity",
            ]),
        }
    }
}

impl OsCommands {
    /// Disables every OS action.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            lock_screen: Vec::new(),
            inhibit_sleep: Vec::new(),
        }
    }
}

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Production effector.
pub struct SystemEffector {
    player: Option<Arc<dyn AlarmPlayer>>,
    monitors: Arc<MonitorHub>,
    commands: OsCommands,
    sound_dirs: Vec<PathBuf>,
    inhibitor: Arc<Mutex<Option<Child>>>,
}

impl SystemEffector {
    /// Creates an effector. Without a player, alarm commands fail.
    pub fn new(player: Option<Arc<dyn AlarmPlayer>>, monitors: Arc<MonitorHub>) -> Self {
        Self {
            player,
            monitors,
            commands: OsCommands::default(),
            sound_dirs: sound_dirs(),
            inhibitor: Arc::new(Mutex::new(None)),
        }
    }

    /// Replaces the OS commands.
    #[must_use]
    pub fn with_os_commands(mut self, commands: OsCommands) -> Self {
        self.commands = commands;
        self
    }

    /// Replaces the directories searched for named sounds.
    #[must_use]
    pub fn with_sound_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.sound_dirs = dirs;
        self
    }

    /// The monitor hub.
    pub fn monitors(&self) -> &Arc<MonitorHub> {
        &self.monitors
    }

    /// Returns true while the sleep inhibitor process is alive.
    pub fn is_sleep_inhibited(&self) -> bool {
        let mut inhibitor = lock_inhibitor(&self.inhibitor);
        match inhibitor.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn play_alarm(&self, sound: &str, volume: f32) -> Result<(), EffectorError> {
        let player = self.player.clone().ok_or_else(|| {
            SoundError::DeviceNotAvailable("アラームプレイヤーがありません".to_string())
        })?;
        let sound = sound.to_string();
        let dirs = self.sound_dirs.clone();

        tokio::task::spawn_blocking(move || {
            let source = resolve_sound(&sound, &dirs);
            player.play(&source, volume)
        })
        .await
        .map_err(|e| EffectorError::TaskFailed(e.to_string()))??;

        info!("アラームを鳴らしています");
        Ok(())
    }

    async fn stop_alarm(&self) -> Result<(), EffectorError> {
        let Some(player) = self.player.clone() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || player.stop())
            .await
            .map_err(|e| EffectorError::TaskFailed(e.to_string()))??;
        Ok(())
    }

    async fn prevent_sleep(&self) -> Result<(), EffectorError> {
        let Some((program, args)) = self.commands.inhibit_sleep.split_first() else {
            return Ok(());
        };
        let program = program.clone();
        let args = args.to_vec();
        let inhibitor = Arc::clone(&self.inhibitor);

        tokio::task::spawn_blocking(move || {
            let mut inhibitor = lock_inhibitor(&inhibitor);
            if let Some(child) = inhibitor.as_mut() {
                if matches!(child.try_wait(), Ok(None)) {
                    return Ok(());
                }
            }

            let child = std::process::Command::new(&program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| EffectorError::CommandFailed {
                    program,
                    detail: e.to_string(),
                })?;
            debug!("スリープを抑止しました (pid {})", child.id());
            *inhibitor = Some(child);
            Ok(())
        })
        .await
        .map_err(|e| EffectorError::TaskFailed(e.to_string()))?
    }

    async fn restore_sleep_policy(&self) -> Result<(), EffectorError> {
        let inhibitor = Arc::clone(&self.inhibitor);
        tokio::task::spawn_blocking(move || release_inhibitor(&inhibitor))
            .await
            .map_err(|e| EffectorError::TaskFailed(e.to_string()))
    }
}

fn lock_inhibitor(inhibitor: &Mutex<Option<Child>>) -> MutexGuard<'_, Option<Child>> {
    match inhibitor.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn release_inhibitor(inhibitor: &Mutex<Option<Child>>) {
    if let Some(mut child) = lock_inhibitor(inhibitor).take() {
        let _ = child.kill();
        let _ = child.wait();
        debug!("スリープ設定を元に戻しました");
    }
}

impl Effector for SystemEffector {
    async fn execute(&self, command: &Command) -> Result<(), EffectorError> {
        match command {
            Command::StartMonitors { sources } => self.monitors.start(sources)?,
            Command::StopMonitors => self.monitors.stop_all(),
            Command::PlayAlarm { sound, volume } => self.play_alarm(sound, *volume).await?,
            Command::StopAlarm => self.stop_alarm().await?,
            Command::LockScreen => run_os_command(&self.commands.lock_screen).await?,
            Command::PreventSleep => self.prevent_sleep().await?,
            Command::RestoreSleepPolicy => self.restore_sleep_policy().await?,
            Command::ShowEscalation { .. } | Command::DismissEscalation | Command::AuthRetry { .. } => {}
        }
        Ok(())
    }
}

impl Drop for SystemEffector {
    fn drop(&mut self) {
        release_inhibitor(&self.inhibitor);
    }
}

impl std::fmt::Debug for SystemEffector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemEffector")
            .field("player", &self.player.is_some())
            .field("monitors", &self.monitors)
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

/// Runs a short OS command on a blocking thread.
async fn run_os_command(argv: &[String]) -> Result<(), EffectorError> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };
    let program = program.clone();
    let args = args.to_vec();

    let output = tokio::task::spawn_blocking({
        let program = program.clone();
        move || std::process::Command::new(program).args(args).output()
    })
    .await
    .map_err(|e| EffectorError::TaskFailed(e.to_string()))?
    .map_err(|e| EffectorError::CommandFailed {
        program: program.clone(),
        detail: e.to_string(),
    })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(EffectorError::CommandFailed {
            program,
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
