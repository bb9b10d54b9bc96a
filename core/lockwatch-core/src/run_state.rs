//! Run state shared between the poll loop and its controller.
//!
//! This is the only object that crosses threads: the controller (signal
//! bridge, service callback, test) requests a stop, the loop waits on it
//! between steps. Every wait is bounded and returns as soon as a stop is
//! requested.

use crate::error::FatalError;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Stopped,
    Running,
    StopRequested,
}

#[derive(Debug)]
struct Shared {
    phase: Mutex<RunPhase>,
    changed: Condvar,
}

/// Owned by the poll loop. Hand out [`StopHandle`]s to controllers.
#[derive(Debug)]
pub struct RunState {
    shared: Arc<Shared>,
}

/// Cloneable, thread-safe control side of a [`RunState`].
#[derive(Debug, Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                phase: Mutex::new(RunPhase::Stopped),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// `Stopped → Running`. A stop requested before the loop started is kept,
    /// so the loop exits on its first check.
    pub(crate) fn mark_running(&self) -> Result<(), FatalError> {
        let mut phase = self
            .shared
            .phase
            .lock()
            .map_err(|_| FatalError::RunStatePoisoned)?;
        if *phase == RunPhase::Stopped {
            *phase = RunPhase::Running;
        }
        Ok(())
    }

    pub(crate) fn mark_stopped(&self) {
        let mut phase = self
            .shared
            .phase
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *phase = RunPhase::Stopped;
        self.shared.changed.notify_all();
    }

    /// Waits up to `timeout` for a stop request. Returns `true` when one
    /// arrived.
    pub(crate) fn wait_for_stop(&self, timeout: Duration) -> Result<bool, FatalError> {
        let phase = self
            .shared
            .phase
            .lock()
            .map_err(|_| FatalError::RunStatePoisoned)?;
        let (phase, _) = self
            .shared
            .changed
            .wait_timeout_while(phase, timeout, |phase| *phase != RunPhase::StopRequested)
            .map_err(|_| FatalError::RunStatePoisoned)?;
        Ok(*phase == RunPhase::StopRequested)
    }
}

impl StopHandle {
    /// Asks the loop to stop. Safe to call from any thread, any number of
    /// times; a stopped loop ignores it.
    pub fn request_stop(&self) {
        let mut phase = self
            .shared
            .phase
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *phase != RunPhase::StopRequested {
            tracing::info!(previous = ?*phase, "Stop requested");
        }
        *phase = RunPhase::StopRequested;
        self.shared.changed.notify_all();
    }

    pub fn phase(&self) -> RunPhase {
        *self
            .shared
            .phase
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.phase() == RunPhase::Running
    }
}
