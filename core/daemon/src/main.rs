//! lockwatch daemon entrypoint.
//!
//! `run` is the long-lived foreground watcher. The remaining commands register
//! and drive it through the platform service manager.

use clap::{Parser, Subcommand};
use lockwatch_core::config::{default_config_path, load_config, state_dir};
use lockwatch_core::{ConfigStore, Detectors, LogLevel, PollLoop, WebhookNotifier};
use std::process::ExitCode;

mod logging;
mod service;
mod signals;

use service::{native_control, ServiceControl, ServiceError};

#[derive(Parser)]
#[command(name = "lockwatch-daemon")]
#[command(about = "Reports session lock and unlock transitions to a webhook")]
#[command(version)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the watcher with the service manager
    Install,
    /// Unregister the watcher
    Remove,
    /// Start the registered watcher
    Start,
    /// Stop the registered watcher
    Stop,
    /// Stop, then start the registered watcher
    Restart,
    /// Show the service manager's view of the watcher
    Status,
    /// Run the watcher in the foreground until SIGINT/SIGTERM
    Run,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run => run_foreground(),
        Commands::Install => control(install),
        Commands::Remove => control(|svc| svc.remove()),
        Commands::Start => control(|svc| svc.start()),
        Commands::Stop => control(|svc| svc.stop()),
        Commands::Restart => control(|svc| svc.restart()),
        Commands::Status => control(|svc| svc.status()),
    }
}

fn run_foreground() -> ExitCode {
    let config_path = match default_config_path() {
        Ok(path) => path,
        Err(err) => {
            eprintln!("lockwatch: {}", err);
            return ExitCode::FAILURE;
        }
    };

    // The level is read once; later edits to log_level need a restart.
    let level = load_config(&config_path)
        .ok()
        .flatten()
        .map(|config| config.log_level)
        .unwrap_or_default();

    let _guard = match state_dir()
        .map_err(|err| err.to_string())
        .and_then(|dir| logging::init_service(level, &dir))
    {
        Ok(guard) => Some(guard),
        Err(err) => {
            logging::init_console(level);
            tracing::warn!(error = %err, "File logging unavailable; logging to stderr");
            None
        }
    };

    tracing::info!(
        config = %config_path.display(),
        level = logging::effective_level(level).as_str(),
        "Starting lockwatch"
    );

    let store = ConfigStore::open(config_path);
    let notifier = match WebhookNotifier::new() {
        Ok(notifier) => notifier,
        Err(err) => {
            tracing::error!(error = %err, "Failed to build HTTP client");
            return ExitCode::FAILURE;
        }
    };

    let mut poll = PollLoop::new(store, Detectors::native(), notifier);
    if let Err(err) = signals::bridge_to(poll.stop_handle()) {
        tracing::error!(error = %err, "Failed to install signal handlers");
        return ExitCode::FAILURE;
    }

    match poll.run() {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

fn control<F>(action: F) -> ExitCode
where
    F: FnOnce(&dyn ServiceControl) -> Result<String, ServiceError>,
{
    logging::init_console(LogLevel::Warning);

    match native_control().and_then(|svc| action(svc.as_ref())) {
        Ok(report) => {
            println!("{}", report);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("lockwatch: {}", err);
            ExitCode::FAILURE
        }
    }
}

/// Registers the service and makes sure a config file exists to edit.
fn install(svc: &dyn ServiceControl) -> Result<String, ServiceError> {
    let store = ConfigStore::open_default()?;
    let report = svc.install()?;
    Ok(format!("{}\nConfig: {}", report, store.path().display()))
}
