//! Configuration loading and saving.
//!
//! The config lives in `~/.lockwatch/config.json`. The poll loop re-reads it
//! every cycle, so interval, webhook and detection method changes apply
//! without a restart. A file that fails to load never replaces the last good
//! snapshot.

use crate::error::ConfigError;
use fs_err as fs;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 2;
pub const MIN_CHECK_INTERVAL_SECS: i64 = 1;
pub const MAX_CHECK_INTERVAL_SECS: i64 = 60;

const HOME_ENV: &str = "LOCKWATCH_HOME";
const STATE_DIR_NAME: &str = ".lockwatch";
const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_KEYS: [&str; 4] = [
    "webhook_url",
    "check_interval",
    "log_level",
    "detection_method",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Unknown names fall back to `INFO`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Self::Debug,
            "WARNING" | "WARN" => Self::Warning,
            "ERROR" => Self::Error,
            _ => Self::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

impl From<String> for LogLevel {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.as_str().to_string()
    }
}

/// Which detector variant the loop samples with.
///
/// Stored as `"wmi"` for the session query strategy to stay compatible with
/// existing config files. Anything that is not `wmi`/`session` means polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DetectionMethod {
    #[default]
    SessionQuery,
    Polling,
}

impl DetectionMethod {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "wmi" | "session" => Self::SessionQuery,
            _ => Self::Polling,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionQuery => "wmi",
            Self::Polling => "polling",
        }
    }
}

impl From<String> for DetectionMethod {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<DetectionMethod> for String {
    fn from(method: DetectionMethod) -> Self {
        method.as_str().to_string()
    }
}

/// The raw `check_interval` value. Anything that is not a JSON integer is
/// kept verbatim as `Invalid` so it survives a save and reads as "use the
/// default" in the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckInterval {
    Seconds(i64),
    Invalid(Value),
}

impl Default for CheckInterval {
    fn default() -> Self {
        Self::Seconds(DEFAULT_CHECK_INTERVAL_SECS as i64)
    }
}

impl From<i64> for CheckInterval {
    fn from(secs: i64) -> Self {
        Self::Seconds(secs)
    }
}

impl PartialEq<i64> for CheckInterval {
    fn eq(&self, other: &i64) -> bool {
        matches!(self, Self::Seconds(secs) if secs == other)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub webhook_url: String,
    /// Seconds between samples. Kept raw so out-of-range values survive a
    /// round trip; use [`DaemonConfig::interval_secs`] to read it.
    pub check_interval: CheckInterval,
    pub log_level: LogLevel,
    pub detection_method: DetectionMethod,
}

impl DaemonConfig {
    /// The configured interval, or `None` when it is not an integer in 1..=60.
    pub fn interval_secs(&self) -> Option<u64> {
        match self.check_interval {
            CheckInterval::Seconds(secs)
                if (MIN_CHECK_INTERVAL_SECS..=MAX_CHECK_INTERVAL_SECS).contains(&secs) =>
            {
                u64::try_from(secs).ok()
            }
            _ => None,
        }
    }
}

/// Supplies a fresh configuration snapshot each poll cycle.
pub trait ConfigSource {
    fn snapshot(&mut self) -> DaemonConfig;
}

/// A fixed config never changes between cycles.
impl ConfigSource for DaemonConfig {
    fn snapshot(&mut self) -> DaemonConfig {
        self.clone()
    }
}

/// File-backed configuration with last-good-snapshot semantics.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: DaemonConfig,
}

impl ConfigStore {
    /// Opens the store at `path`, creating the file with defaults when it is
    /// missing. Load failures are logged and leave the defaults in place.
    pub fn open(path: PathBuf) -> Self {
        let mut store = Self {
            path,
            current: DaemonConfig::default(),
        };
        if let Err(err) = store.reload() {
            tracing::error!(error = %err, path = %store.path.display(), "Failed to load config; using defaults");
        }
        store
    }

    pub fn open_default() -> Result<Self, ConfigError> {
        Ok(Self::open(default_config_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> &DaemonConfig {
        &self.current
    }

    /// Re-reads the file. On error the previous snapshot stays current.
    pub fn reload(&mut self) -> Result<&DaemonConfig, ConfigError> {
        match load_config(&self.path)? {
            Some(config) => self.current = config,
            None => {
                tracing::info!(path = %self.path.display(), "Config file missing; writing defaults");
                save_config(&self.path, &self.current)?;
            }
        }
        Ok(&self.current)
    }

    /// Applies `change` and persists the result.
    pub fn update<F>(&mut self, change: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut DaemonConfig),
    {
        let mut next = self.current.clone();
        change(&mut next);
        save_config(&self.path, &next)?;
        self.current = next;
        Ok(())
    }
}

impl ConfigSource for ConfigStore {
    fn snapshot(&mut self) -> DaemonConfig {
        if let Err(err) = self.reload() {
            tracing::error!(error = %err, "Config reload failed; keeping previous settings");
        }
        self.current.clone()
    }
}

/// Directory holding the config and log files.
pub fn state_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = env::var(HOME_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
    Ok(home.join(STATE_DIR_NAME))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(state_dir()?.join(CONFIG_FILE_NAME))
}

/// Loads the config at `path`. Returns `Ok(None)` when the file is missing.
/// Keys absent from the file are backfilled from the defaults.
pub fn load_config(path: &Path) -> Result<Option<DaemonConfig>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let value: Value = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let object = value.as_object().ok_or_else(|| ConfigError::NotAnObject {
        path: path.to_path_buf(),
    })?;

    let missing: Vec<&str> = CONFIG_KEYS
        .iter()
        .copied()
        .filter(|key| !object.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        tracing::debug!(missing = ?missing, "Backfilling config keys from defaults");
    }

    let defaults = DaemonConfig::default();
    Ok(Some(DaemonConfig {
        webhook_url: field(object, "webhook_url").unwrap_or(defaults.webhook_url),
        check_interval: field(object, "check_interval").unwrap_or(defaults.check_interval),
        log_level: field(object, "log_level").unwrap_or(defaults.log_level),
        detection_method: field(object, "detection_method").unwrap_or(defaults.detection_method),
    }))
}

/// One key of the config object. A value of the wrong JSON type is logged
/// and dropped so the other keys still load.
fn field<T: DeserializeOwned>(object: &Map<String, Value>, key: &str) -> Option<T> {
    let value = object.get(key)?;
    match T::deserialize(value) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            tracing::warn!(key, value = %value, error = %err, "Ignoring invalid config value; using default");
            None
        }
    }
}

/// Writes the config atomically (temp file, then rename).
pub fn save_config(path: &Path, config: &DaemonConfig) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let payload = serde_json::to_vec_pretty(config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload).map_err(write_err)?;
    fs::rename(&tmp_path, path).map_err(write_err)?;
    Ok(())
}
