//! Service lifecycle commands.
//!
//! The daemon itself is a plain foreground process (`lockwatch-daemon run`).
//! Registration and start/stop are delegated to the platform's own manager:
//!
//! - Windows: a Task Scheduler task that launches `run` at logon.
//! - Linux: a systemd user unit.
//!
//! `schtasks /End` terminates the process outright; systemd sends SIGTERM,
//! which the daemon turns into a graceful stop.

use fs_err as fs;
use lockwatch_core::ConfigError;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const TASK_NAME: &str = "LockScreenDetector";
pub const SYSTEMD_UNIT: &str = "lockwatch.service";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Service control is not supported on {0}")]
    Unsupported(&'static str),

    #[error("Failed to resolve daemon executable: {0}")]
    CurrentExe(#[source] io::Error),

    #[error("Config directory not found")]
    NoConfigDir,

    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{command} failed (exit {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to update unit file {path}: {source}")]
    UnitFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external service-manager commands.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ServiceError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ServiceError> {
        tracing::debug!(program, args = ?args, "Running service command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| ServiceError::Spawn {
                command: describe(program, args),
                source,
            })?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn describe(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

fn run_checked<R: CommandRunner>(
    runner: &R,
    program: &str,
    args: &[&str],
) -> Result<String, ServiceError> {
    let output = runner.run(program, args)?;
    if !output.success() {
        return Err(ServiceError::CommandFailed {
            command: describe(program, args),
            code: output.code,
            stderr: if output.stderr.is_empty() {
                output.stdout
            } else {
                output.stderr
            },
        });
    }
    Ok(output.stdout)
}

/// The six lifecycle commands. Each returns a short human-readable report.
pub trait ServiceControl {
    fn install(&self) -> Result<String, ServiceError>;
    fn remove(&self) -> Result<String, ServiceError>;
    fn start(&self) -> Result<String, ServiceError>;
    fn stop(&self) -> Result<String, ServiceError>;
    fn status(&self) -> Result<String, ServiceError>;

    fn restart(&self) -> Result<String, ServiceError> {
        if let Err(err) = self.stop() {
            tracing::debug!(error = %err, "Stop before restart failed; starting anyway");
        }
        self.start()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Windows: Task Scheduler
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct ScheduledTask<R: CommandRunner> {
    runner: R,
    exe: PathBuf,
}

impl<R: CommandRunner> ScheduledTask<R> {
    pub fn new(runner: R, exe: PathBuf) -> Self {
        Self { runner, exe }
    }

    fn schtasks(&self, args: &[&str]) -> Result<String, ServiceError> {
        run_checked(&self.runner, "schtasks", args)
    }
}

impl<R: CommandRunner> ServiceControl for ScheduledTask<R> {
    fn install(&self) -> Result<String, ServiceError> {
        let action = format!("\"{}\" run", self.exe.display());
        self.schtasks(&[
            "/Create", "/F", "/TN", TASK_NAME, "/SC", "ONLOGON", "/RL", "LIMITED", "/TR", &action,
        ])?;
        Ok(format!("Installed scheduled task {}", TASK_NAME))
    }

    fn remove(&self) -> Result<String, ServiceError> {
        self.schtasks(&["/Delete", "/F", "/TN", TASK_NAME])?;
        Ok(format!("Removed scheduled task {}", TASK_NAME))
    }

    fn start(&self) -> Result<String, ServiceError> {
        self.schtasks(&["/Run", "/TN", TASK_NAME])?;
        Ok(format!("Started {}", TASK_NAME))
    }

    fn stop(&self) -> Result<String, ServiceError> {
        self.schtasks(&["/End", "/TN", TASK_NAME])?;
        Ok(format!("Stopped {}", TASK_NAME))
    }

    fn status(&self) -> Result<String, ServiceError> {
        self.schtasks(&["/Query", "/TN", TASK_NAME, "/FO", "LIST"])
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Linux: systemd user unit
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct SystemdUserUnit<R: CommandRunner> {
    runner: R,
    exe: PathBuf,
    unit_dir: PathBuf,
}

impl<R: CommandRunner> SystemdUserUnit<R> {
    pub fn new(runner: R, exe: PathBuf, unit_dir: PathBuf) -> Self {
        Self {
            runner,
            exe,
            unit_dir,
        }
    }

    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(SYSTEMD_UNIT)
    }

    fn systemctl(&self, args: &[&str]) -> Result<String, ServiceError> {
        let mut full = vec!["--user"];
        full.extend_from_slice(args);
        run_checked(&self.runner, "systemctl", &full)
    }
}

pub fn render_unit(exe: &Path) -> String {
    format!(
        "[Unit]\n\
         Description=Session lock watcher (lockwatch)\n\
         After=graphical-session.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart=\"{}\" run\n\
         Restart=on-failure\n\
         RestartSec=5\n\
         \n\
         [Install]\n\
         WantedBy=default.target\n",
        exe.display()
    )
}

impl<R: CommandRunner> ServiceControl for SystemdUserUnit<R> {
    fn install(&self) -> Result<String, ServiceError> {
        let path = self.unit_path();
        let unit_err = |source| ServiceError::UnitFile {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.unit_dir).map_err(unit_err)?;
        fs::write(&path, render_unit(&self.exe)).map_err(unit_err)?;

        self.systemctl(&["daemon-reload"])?;
        self.systemctl(&["enable", SYSTEMD_UNIT])?;
        Ok(format!("Installed {}", path.display()))
    }

    fn remove(&self) -> Result<String, ServiceError> {
        if let Err(err) = self.systemctl(&["disable", "--now", SYSTEMD_UNIT]) {
            tracing::warn!(error = %err, "Failed to disable unit; removing anyway");
        }
        let path = self.unit_path();
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(ServiceError::UnitFile { path, source }),
        }
        self.systemctl(&["daemon-reload"])?;
        Ok(format!("Removed {}", SYSTEMD_UNIT))
    }

    fn start(&self) -> Result<String, ServiceError> {
        self.systemctl(&["start", SYSTEMD_UNIT])?;
        Ok(format!("Started {}", SYSTEMD_UNIT))
    }

    fn stop(&self) -> Result<String, ServiceError> {
        self.systemctl(&["stop", SYSTEMD_UNIT])?;
        Ok(format!("Stopped {}", SYSTEMD_UNIT))
    }

    fn restart(&self) -> Result<String, ServiceError> {
        self.systemctl(&["restart", SYSTEMD_UNIT])?;
        Ok(format!("Restarted {}", SYSTEMD_UNIT))
    }

    /// `is-active` exits non-zero for inactive units; its stdout is the answer.
    fn status(&self) -> Result<String, ServiceError> {
        let output = self
            .runner
            .run("systemctl", &["--user", "is-active", SYSTEMD_UNIT])?;
        if output.stdout.is_empty() {
            return Err(ServiceError::CommandFailed {
                command: describe("systemctl", &["--user", "is-active", SYSTEMD_UNIT]),
                code: output.code,
                stderr: output.stderr,
            });
        }
        Ok(format!("{}: {}", SYSTEMD_UNIT, output.stdout))
    }
}

/// The service backend for the running platform.
pub fn native_control() -> Result<Box<dyn ServiceControl>, ServiceError> {
    let exe = std::env::current_exe().map_err(ServiceError::CurrentExe)?;
    if cfg!(target_os = "windows") {
        return Ok(Box::new(ScheduledTask::new(SystemRunner, exe)));
    }
    if cfg!(target_os = "linux") {
        let unit_dir = dirs::config_dir()
            .ok_or(ServiceError::NoConfigDir)?
            .join("systemd")
            .join("user");
        return Ok(Box::new(SystemdUserUnit::new(SystemRunner, exe, unit_dir)));
    }
    Err(ServiceError::Unsupported(std::env::consts::OS))
}
