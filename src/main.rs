//! theftguard CLI - anti-theft alarm for laptops
//!
//! Arms automatically when every trusted device walks away, disarms when
//! one comes back, and sounds a siren if the machine is disturbed while
//! the owner is gone.

use anyhow::Result;
use clap::{CommandFactory, Parser};

use theftguard::cli::{Cli, Commands, DeviceCommands, Display, IpcClient};
use theftguard::daemon::run_daemon;
use theftguard::types::{DeviceId, DeviceSpec};

/// Main entry point
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    if let Err(e) = execute(cli).await {
        Display::show_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

/// Initializes the tracing subscriber for logging.
///
/// `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

/// Executes the CLI command.
async fn execute(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let client = || -> Result<IpcClient> {
        match &cli.socket {
            Some(path) => Ok(IpcClient::with_socket_path(path.clone())),
            None => IpcClient::new(),
        }
    };

    match command {
        Commands::Arm => {
            let response = client()?.arm().await?;
            Display::show_success(&response);
        }
        Commands::Disarm(args) => {
            let response = client()?.disarm(args.pin).await?;
            Display::show_success(&response);
        }
        Commands::Auth(args) => {
            let response = client()?.auth(args.pin).await?;
            Display::show_success(&response);
        }
        Commands::Status => {
            let response = client()?.status().await?;
            Display::show_status(&response);
        }
        Commands::Sample(args) => {
            let response = client()?
                .sample(DeviceId::new(args.device), args.rssi, args.connected)
                .await?;
            Display::show_success(&response);
        }
        Commands::Trigger { source } => {
            let response = client()?.trigger(source).await?;
            Display::show_success(&response);
        }
        Commands::Device { action } => {
            let response = match action {
                DeviceCommands::Add { id, name, kind } => {
                    client()?.device_add(DeviceSpec::new(id, name, kind)).await?
                }
                DeviceCommands::Remove { id } => client()?.device_remove(DeviceId::new(id)).await?,
            };
            Display::show_success(&response);
        }
        Commands::Daemon { config } => {
            run_daemon(config, cli.socket.clone()).await?;
        }
        Commands::Completions { shell } => {
            generate_completions(shell);
        }
    }

    Ok(())
}

/// Generates shell completion scripts.
fn generate_completions(shell: clap_complete::Shell) {
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_args() {
        let cli = Cli::parse_from(["theftguard"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parse_status() {
        let cli = Cli::parse_from(["theftguard", "status"]);
        assert!(matches!(cli.command, Some(Commands::Status)));
    }

    #[test]
    fn test_cli_parse_verbose() {
        let cli = Cli::parse_from(["theftguard", "--verbose", "arm"]);
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
