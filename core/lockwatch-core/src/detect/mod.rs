//! Session lock detection.
//!
//! Two strategies sample the lock state:
//!
//! - [`PollingDetector`] asks the OS "is this workstation locked?" directly.
//!   It never learns who is logged on.
//! - [`SessionQueryDetector`] reads the console session's user and scans the
//!   process table for a lock-screen UI.
//!
//! Both fail safe: a query error is logged and reported as *unlocked*, so a
//! flaky OS call can never produce a false "locked" notification.
//!
//! Platform access sits behind [`LockQuery`] and [`SessionInspector`] so the
//! detectors can be driven by fakes in tests.

mod process;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

pub use process::{matches_process_name, ProcessTable, LOCK_SCREEN_PROCESSES};

use crate::config::DetectionMethod;
use crate::error::DetectionError;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockObservation {
    pub locked: bool,
    pub user: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl LockObservation {
    pub fn new(locked: bool, user: Option<String>) -> Self {
        Self {
            locked,
            user,
            observed_at: Utc::now(),
        }
    }

    /// What a detector reports when it cannot tell.
    pub fn fail_safe() -> Self {
        Self::new(false, None)
    }
}

pub trait LockDetector {
    fn method(&self) -> DetectionMethod;
    fn observe(&mut self) -> Result<LockObservation, DetectionError>;
}

/// The OS "is workstation locked" primitive.
pub trait LockQuery {
    fn is_workstation_locked(&mut self) -> Result<bool, DetectionError>;
}

/// Console session and process table access.
pub trait SessionInspector {
    /// The user on the active console session, `None` when nobody is logged on.
    fn console_user(&mut self) -> Result<Option<String>, DetectionError>;
    /// Whether a lock-screen UI process is running.
    fn lock_screen_active(&mut self) -> Result<bool, DetectionError>;
}

#[derive(Debug)]
pub struct PollingDetector<Q: LockQuery> {
    query: Q,
}

impl<Q: LockQuery> PollingDetector<Q> {
    pub fn new(query: Q) -> Self {
        Self { query }
    }
}

impl<Q: LockQuery> LockDetector for PollingDetector<Q> {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::Polling
    }

    fn observe(&mut self) -> Result<LockObservation, DetectionError> {
        match self.query.is_workstation_locked() {
            Ok(locked) => Ok(LockObservation::new(locked, None)),
            Err(err) => {
                tracing::error!(error = %err, "Workstation lock query failed; assuming unlocked");
                Ok(LockObservation::fail_safe())
            }
        }
    }
}

#[derive(Debug)]
pub struct SessionQueryDetector<I: SessionInspector> {
    inspector: Result<I, String>,
}

impl<I: SessionInspector> SessionQueryDetector<I> {
    pub fn new(inspector: I) -> Self {
        Self {
            inspector: Ok(inspector),
        }
    }

    /// A detector whose inspector failed to initialize. Every observation
    /// falls back to unlocked.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            inspector: Err(reason.into()),
        }
    }

    fn inspect(&mut self) -> Result<LockObservation, DetectionError> {
        let inspector = self
            .inspector
            .as_mut()
            .map_err(|reason| DetectionError::Unavailable(reason.clone()))?;

        let user = inspector.console_user()?;
        tracing::debug!(user = ?user, "Console session user");
        if user.is_none() {
            tracing::debug!("No user logged on; treating session as locked");
            return Ok(LockObservation::new(true, None));
        }

        if inspector.lock_screen_active()? {
            tracing::debug!("Lock screen process found; treating session as locked");
            return Ok(LockObservation::new(true, user));
        }

        Ok(LockObservation::new(false, user))
    }
}

impl<I: SessionInspector> LockDetector for SessionQueryDetector<I> {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::SessionQuery
    }

    fn observe(&mut self) -> Result<LockObservation, DetectionError> {
        match self.inspect() {
            Ok(observation) => Ok(observation),
            Err(err) => {
                tracing::error!(
                    error = %err,
                    method = DetectionMethod::SessionQuery.as_str(),
                    "Session lock query failed; assuming unlocked"
                );
                Ok(LockObservation::fail_safe())
            }
        }
    }
}

/// Lazily built detector per method. Each variant is created on first use
/// and reused afterwards, so handles like the process table persist across
/// cycles while the method itself can change on every config reload.
pub struct Detectors {
    build: Box<dyn FnMut(DetectionMethod) -> Box<dyn LockDetector>>,
    polling: Option<Box<dyn LockDetector>>,
    session_query: Option<Box<dyn LockDetector>>,
}

impl Detectors {
    pub fn new<F>(build: F) -> Self
    where
        F: FnMut(DetectionMethod) -> Box<dyn LockDetector> + 'static,
    {
        Self {
            build: Box::new(build),
            polling: None,
            session_query: None,
        }
    }

    /// Detectors backed by the running platform.
    pub fn native() -> Self {
        Self::new(native_detector)
    }

    pub fn select(&mut self, method: DetectionMethod) -> &mut dyn LockDetector {
        let slot = match method {
            DetectionMethod::Polling => &mut self.polling,
            DetectionMethod::SessionQuery => &mut self.session_query,
        };
        if slot.is_none() {
            tracing::info!(method = method.as_str(), "Initializing lock detector");
        }
        let build = &mut self.build;
        slot.get_or_insert_with(|| build(method)).as_mut()
    }
}

impl std::fmt::Debug for Detectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detectors")
            .field("polling", &self.polling.is_some())
            .field("session_query", &self.session_query.is_some())
            .finish()
    }
}

pub fn native_detector(method: DetectionMethod) -> Box<dyn LockDetector> {
    match method {
        DetectionMethod::Polling => Box::new(PollingDetector::new(NativeLockQuery)),
        DetectionMethod::SessionQuery => match SystemSessionInspector::new() {
            Ok(inspector) => Box::new(SessionQueryDetector::new(inspector)),
            Err(err) => {
                tracing::error!(error = %err, "Session inspector initialization failed");
                Box::new(SessionQueryDetector::<SystemSessionInspector>::unavailable(
                    err.to_string(),
                ))
            }
        },
    }
}

/// Native lock query for the running platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLockQuery;

impl LockQuery for NativeLockQuery {
    fn is_workstation_locked(&mut self) -> Result<bool, DetectionError> {
        #[cfg(target_os = "windows")]
        {
            windows::is_workstation_locked()
        }
        #[cfg(target_os = "linux")]
        {
            linux::is_workstation_locked()
        }
        #[cfg(not(any(target_os = "windows", target_os = "linux")))]
        {
            Err(DetectionError::Unsupported(std::env::consts::OS))
        }
    }
}

/// Console user lookup plus a lock-screen check: logind on Linux, a process
/// table scan for lock-screen UIs everywhere.
#[derive(Debug)]
pub struct SystemSessionInspector {
    processes: ProcessTable,
}

impl SystemSessionInspector {
    pub fn new() -> Result<Self, DetectionError> {
        if !cfg!(any(
            target_os = "windows",
            target_os = "linux",
            target_os = "macos"
        )) {
            return Err(DetectionError::Unsupported(std::env::consts::OS));
        }
        Ok(Self {
            processes: ProcessTable::new(),
        })
    }
}

impl SessionInspector for SystemSessionInspector {
    fn console_user(&mut self) -> Result<Option<String>, DetectionError> {
        #[cfg(target_os = "windows")]
        {
            windows::console_user()
        }
        #[cfg(target_os = "linux")]
        {
            linux::console_user()
        }
        #[cfg(target_os = "macos")]
        {
            macos::console_user()
        }
        #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
        {
            Err(DetectionError::Unsupported(std::env::consts::OS))
        }
    }

    /// On Linux logind's `LockedHint` is asked first. Lockers that never set
    /// the hint (i3lock and friends) are still caught by the process scan.
    fn lock_screen_active(&mut self) -> Result<bool, DetectionError> {
        #[cfg(target_os = "linux")]
        {
            match linux::is_workstation_locked() {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(err) => {
                    tracing::debug!(error = %err, "LockedHint unavailable; scanning processes only")
                }
            }
        }
        Ok(self.processes.any_running(LOCK_SCREEN_PROCESSES))
    }
}
