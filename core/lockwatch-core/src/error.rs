//! Error types for lockwatch-core operations.
//!
//! Every error here is caught at the narrowest scope that can continue.
//! Only [`FatalError`] is allowed to end the poll loop.

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    NoHome,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config file malformed: {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Config file is not a JSON object: {path}")]
    NotAnObject { path: PathBuf },

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Detection
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("Lock detection is not supported on {0}")]
    Unsupported(&'static str),

    #[error("Session inspector unavailable: {0}")]
    Unavailable(String),

    #[error("Session query failed: {query}: {details}")]
    QueryFailed { query: String, details: String },
}

impl DetectionError {
    pub fn query(query: &str, details: impl Into<String>) -> Self {
        Self::QueryFailed {
            query: query.to_string(),
            details: details.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Notification
// ═══════════════════════════════════════════════════════════════════════════════

/// Delivery failures. An unconfigured endpoint is not one of them; it is
/// reported as [`crate::notifier::Delivery::Skipped`].
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Webhook transport failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),

    #[error("Webhook response was not understood: {0}")]
    InvalidResponse(String),

    #[error("Webhook rejected message: errcode={errcode} errmsg={errmsg}")]
    Rejected { errcode: i64, errmsg: String },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Poll loop
// ═══════════════════════════════════════════════════════════════════════════════

/// A failed poll cycle. Logged, followed by a backoff, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum IterationError {
    #[error("Detector failed: {0}")]
    Detection(#[from] DetectionError),

    #[error("Poll iteration panicked: {0}")]
    Panicked(String),
}

/// An error that escaped iteration isolation. Halts the loop.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("Run state lock poisoned")]
    RunStatePoisoned,

    #[error("Poll loop panicked: {0}")]
    Panicked(String),
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
