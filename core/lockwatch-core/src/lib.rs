//! # lockwatch-core
//!
//! Watches the interactive session for lock/unlock transitions and sends one
//! webhook message per transition.
//!
//! ## Design Principles
//!
//! - **Synchronous**: one sequential loop, no async runtime.
//! - **Fail safe**: detection errors read as *unlocked*; a missed message is
//!   preferred to a false alarm.
//! - **Keeps running**: every error is caught at the narrowest scope that can
//!   continue. Only [`error::FatalError`] stops the loop.
//! - **Injected state**: config source, detectors, notifier and run state
//!   are passed to [`poll_loop::PollLoop`]; there are no globals.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lockwatch_core::{ConfigStore, Detectors, PollLoop, WebhookNotifier};
//!
//! let config = ConfigStore::open_default()?;
//! let mut poll = PollLoop::new(config, Detectors::native(), WebhookNotifier::new()?);
//! let stop = poll.stop_handle();
//! poll.run()?;
//! ```

pub mod config;
pub mod detect;
pub mod error;
pub mod notifier;
pub mod poll_loop;
pub mod run_state;
pub mod tracker;

#[cfg(test)]
mod test_logs;

pub use config::{
    CheckInterval, ConfigSource, ConfigStore, DaemonConfig, DetectionMethod, LogLevel,
};
pub use detect::{Detectors, LockDetector, LockObservation};
pub use error::{ConfigError, DetectionError, FatalError, IterationError, NotifyError};
pub use notifier::{Delivery, Notifier, WebhookNotifier};
pub use poll_loop::{LoopStats, LoopTiming, PollLoop};
pub use run_state::{RunPhase, StopHandle};
pub use tracker::{Transition, TransitionKind, TransitionTracker};
