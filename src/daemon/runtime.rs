//! Daemon assembly.
//!
//! Wires the coordinator, the command dispatcher, the monitor hub and the
//! IPC server together. The monitor hub feeds the coordinator and the
//! coordinator drives the hub through the dispatcher, so the pieces are
//! built in a fixed order:
//!
//! 1. coordinator and its handle
//! 2. monitor hub, emitting into the handle
//! 3. system effector over the hub, wrapped in a dispatcher
//! 4. coordinator connected to the dispatcher, both spawned

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::coordinator::{AlarmCoordinator, CoordinatorHandle};
use super::ipc::{serve, IpcServer, RequestHandler};
use crate::auth::{AuthGate, LocalAuthGate};
use crate::effector::{CommandDispatcher, DispatcherHandle, OsCommands, SystemEffector};
use crate::monitor::{EventSink, ManualMonitor, MonitorHub};
use crate::sound::{try_create_player, AlarmPlayer};
use crate::types::{Command, GuardConfig, TriggerSource};

// ============================================================================
// ServiceOptions
// ============================================================================

/// Platform collaborators injected into [`GuardServices`].
pub struct ServiceOptions {
    /// Siren player; alarm commands fail without one
    pub player: Option<Arc<dyn AlarmPlayer>>,
    /// Lock screen and sleep inhibit commands
    pub os_commands: OsCommands,
    /// Poll the lid and power state files where available
    pub platform_monitors: bool,
    /// Directories searched for named sounds
    pub sound_dirs: Option<Vec<PathBuf>>,
}

impl ServiceOptions {
    /// Options for the real daemon.
    pub fn system(player: Option<Arc<dyn AlarmPlayer>>) -> Self {
        Self {
            player,
            os_commands: OsCommands::default(),
            platform_monitors: true,
            sound_dirs: None,
        }
    }

    /// No audio, no OS commands, manual monitors only.
    pub fn headless() -> Self {
        Self {
            player: None,
            os_commands: OsCommands::disabled(),
            platform_monitors: false,
            sound_dirs: Some(Vec::new()),
        }
    }
}

// ============================================================================
// GuardServices
// ============================================================================

/// A running coordinator with its effectors.
pub struct GuardServices {
    coordinator: CoordinatorHandle,
    dispatcher: DispatcherHandle,
    monitors: Arc<MonitorHub>,
    coordinator_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
}

impl GuardServices {
    /// Builds and spawns the services.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is rejected by the coordinator.
    pub fn start(config: &GuardConfig, options: ServiceOptions) -> Result<Self> {
        let (coordinator, handle) =
            AlarmCoordinator::new(config).context("コーディネーターを初期化できません")?;

        let sink: Arc<dyn EventSink> = Arc::new(handle.clone());
        let monitors = if options.platform_monitors {
            MonitorHub::with_defaults(sink)
        } else {
            let mut hub = MonitorHub::new(sink);
            for source in TriggerSource::ALL {
                hub.register(Arc::new(ManualMonitor::new(source)));
            }
            hub
        };
        let monitors = Arc::new(monitors);

        let mut effector = SystemEffector::new(options.player, Arc::clone(&monitors))
            .with_os_commands(options.os_commands);
        if let Some(dirs) = options.sound_dirs {
            effector = effector.with_sound_dirs(dirs);
        }

        let (dispatcher, dispatch) =
            CommandDispatcher::new(Arc::new(effector), config.effector_timeout());
        let dispatcher_task = dispatcher.spawn();
        let coordinator_task = coordinator.with_dispatcher(dispatch.clone()).spawn();

        Ok(Self {
            coordinator: handle,
            dispatcher: dispatch,
            monitors,
            coordinator_task,
            dispatcher_task,
        })
    }

    /// Handle to the coordinator.
    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Handle to the command dispatcher.
    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.dispatcher
    }

    /// The monitor hub.
    pub fn monitors(&self) -> &Arc<MonitorHub> {
        &self.monitors
    }

    /// Stops the coordinator and brings every effector back to rest.
    ///
    /// # Errors
    ///
    /// Returns an error if a task panicked.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            coordinator,
            dispatcher,
            monitors,
            coordinator_task,
            dispatcher_task,
        } = self;

        coordinator.shutdown();
        coordinator_task
            .await
            .context("コーディネーターが異常終了しました")?;

        for command in [
            Command::StopAlarm,
            Command::StopMonitors,
            Command::RestoreSleepPolicy,
        ] {
            dispatcher.dispatch(command);
        }
        dispatcher.flush().await;
        monitors.stop_all();

        drop(dispatcher);
        dispatcher_task
            .await
            .context("ディスパッチャーが異常終了しました")?;
        Ok(())
    }
}

// ============================================================================
// Daemon entry point
// ============================================================================

/// Runs the daemon until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the socket
/// cannot be bound.
pub async fn run_daemon(config_path: Option<PathBuf>, socket_path: Option<PathBuf>) -> Result<()> {
    let config_path = match config_path {
        Some(path) => path,
        None => GuardConfig::default_path()?,
    };
    let config = GuardConfig::load(&config_path)?;

    let player = try_create_player().map(|player| player as Arc<dyn AlarmPlayer>);
    if player.is_none() {
        warn!("オーディオデバイスがないため、警報音は鳴りません");
    }

    let services = GuardServices::start(&config, ServiceOptions::system(player))?;
    let auth: Arc<dyn AuthGate> = Arc::new(LocalAuthGate::new(config.pin.clone(), None));

    let socket_path = match socket_path {
        Some(path) => path,
        None => IpcServer::default_path()?,
    };
    let server = IpcServer::new(&socket_path)?;
    let handler = RequestHandler::new(
        services.coordinator().clone(),
        auth,
        Arc::clone(services.monitors()),
    )
    .with_config_file(config, config_path);

    info!("Daemonを起動しました: {}", socket_path.display());
    serve(&server, Arc::new(handler), shutdown_signal()).await;
    info!("Daemonを停止します");

    drop(server);
    services.shutdown().await
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!("SIGTERMを監視できません: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl-Cを監視できません: {}", e);
    }
}

// ============================================================================
// Tests
// ============================================================================
