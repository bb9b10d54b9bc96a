//! Log setup for the daemon.
//!
//! `run` appends to `service.log` in the state directory (and mirrors to
//! stderr at DEBUG). Control commands log to stderr only.

use fs_err as fs;
use lockwatch_core::LogLevel;
use std::env;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "service.log";
const DEBUG_ENV: &str = "LOCKWATCH_DEBUG_LOG";

fn debug_forced() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

pub fn effective_level(configured: LogLevel) -> LogLevel {
    if debug_forced() {
        LogLevel::Debug
    } else {
        configured
    }
}

fn filter_for(level: LogLevel) -> EnvFilter {
    if debug_forced() {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()))
}

/// File logging for the foreground service. The returned guard flushes the
/// background writer on drop and must live as long as the process logs.
pub fn init_service(level: LogLevel, log_dir: &Path) -> Result<WorkerGuard, String> {
    fs::create_dir_all(log_dir).map_err(|err| format!("Failed to create log directory: {}", err))?;

    let appender = tracing_appender::rolling::never(log_dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false);
    let console_layer = (effective_level(level) == LogLevel::Debug).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter_for(level))
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| format!("Failed to install log subscriber: {}", err))?;
    Ok(guard)
}

pub fn init_console(level: LogLevel) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
