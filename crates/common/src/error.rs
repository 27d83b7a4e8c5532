//! Error types shared across Stillreel crates.

use serde::{Deserialize, Serialize};
use stillreel_delivery::{DeliveryError, SinkError};
use stillreel_effects::PlanError;
use stillreel_job_model::{AssetRole, StateError};

/// Diagnostics keep at most this many trailing stderr lines.
pub const DIAGNOSTIC_MAX_LINES: usize = 8;

/// Diagnostics keep at most this many trailing bytes.
pub const DIAGNOSTIC_MAX_BYTES: usize = 2048;

/// Top-level error type for Stillreel operations.
#[derive(Debug, thiserror::Error)]
pub enum StillreelError {
    #[error("Failed to fetch {role}: {message}")]
    Fetch { role: AssetRole, message: String },

    #[error("Duration probe failed: {message}")]
    Probe { message: String, diagnostic: String },

    #[error("Encoding failed: {message}")]
    Encode { message: String, diagnostic: String },

    #[error("Delivery failed: {message}")]
    Delivery { message: String },

    #[error("{count} resource(s) left unreleased: {}", names.join(", "))]
    ResourceLeak { count: usize, names: Vec<String> },

    #[error("Job cancelled during {phase}")]
    Cancelled { phase: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid job state: {message}")]
    InvalidState { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using StillreelError.
pub type StillreelResult<T> = Result<T, StillreelError>;

/// Coarse classification reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    FetchFailed,
    ProbeFailed,
    EncodeFailed,
    DeliveryFailed,
    ResourceLeakDetected,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FetchFailed => "FetchFailed",
            Self::ProbeFailed => "ProbeFailed",
            Self::EncodeFailed => "EncodeFailed",
            Self::DeliveryFailed => "DeliveryFailed",
            Self::ResourceLeakDetected => "ResourceLeakDetected",
            Self::Cancelled => "Cancelled",
            Self::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StillreelError {
    pub fn fetch(role: AssetRole, msg: impl Into<String>) -> Self {
        Self::Fetch {
            role,
            message: msg.into(),
        }
    }

    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe {
            message: msg.into(),
            diagnostic: String::new(),
        }
    }

    pub fn probe_with_diagnostic(msg: impl Into<String>, stderr: &str) -> Self {
        Self::Probe {
            message: msg.into(),
            diagnostic: trim_diagnostic(stderr),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
            diagnostic: String::new(),
        }
    }

    pub fn encode_with_diagnostic(msg: impl Into<String>, stderr: &str) -> Self {
        Self::Encode {
            message: msg.into(),
            diagnostic: trim_diagnostic(stderr),
        }
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery {
            message: msg.into(),
        }
    }

    pub fn cancelled(phase: impl Into<String>) -> Self {
        Self::Cancelled {
            phase: phase.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Fetch { .. } => ErrorKind::FetchFailed,
            Self::Probe { .. } => ErrorKind::ProbeFailed,
            Self::Encode { .. } => ErrorKind::EncodeFailed,
            Self::Delivery { .. } => ErrorKind::DeliveryFailed,
            Self::ResourceLeak { .. } => ErrorKind::ResourceLeakDetected,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Config { .. }
            | Self::InvalidState { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Engine stderr attached to probe/encode failures, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::Probe { diagnostic, .. } | Self::Encode { diagnostic, .. }
                if !diagnostic.is_empty() =>
            {
                Some(diagnostic.as_str())
            }
            _ => None,
        }
    }
}

impl From<PlanError> for StillreelError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::Config { message } => Self::Config { message },
            PlanError::InvalidDuration { .. } => Self::probe(err.to_string()),
        }
    }
}

impl From<StateError> for StillreelError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::InvalidDuration { .. } => Self::probe(err.to_string()),
            _ => Self::invalid_state(err.to_string()),
        }
    }
}

impl From<SinkError> for StillreelError {
    fn from(err: SinkError) -> Self {
        Self::delivery(err.to_string())
    }
}

impl From<DeliveryError> for StillreelError {
    fn from(err: DeliveryError) -> Self {
        Self::delivery(err.to_string())
    }
}

/// Keep the tail of engine stderr: the last few non-empty lines, capped in size.
pub fn trim_diagnostic(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_MAX_LINES);
    let joined = lines[start..].join("\n");

    if joined.len() <= DIAGNOSTIC_MAX_BYTES {
        return joined;
    }
    let mut cut = joined.len() - DIAGNOSTIC_MAX_BYTES;
    while !joined.is_char_boundary(cut) {
        cut += 1;
    }
    joined[cut..].to_string()
}
