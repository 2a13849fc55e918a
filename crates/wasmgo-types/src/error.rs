use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::exit::TerminationSignal;

/// Errors raised while loading, wiring, or running a guest.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The guest asked for something the host does not model, or used a
    /// value at the wrong type. Unrecoverable for the current run.
    #[error("protocol violation on {value}: {detail}")]
    ProtocolViolation { value: String, detail: String },

    /// ABI surface the host deliberately does not provide.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The module failed to parse, link, instantiate, or execute.
    #[error("engine error: {0}")]
    Engine(String),

    /// The module could not be read from storage.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file or value was malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Bridge registration or lookup failed, or a lifecycle step was taken
    /// out of order.
    #[error("registry error: {0}")]
    Registry(String),

    /// A host facility the bridge relies on (signals, randomness) failed.
    #[error("host error: {0}")]
    Host(String),

    /// The guest was unwound because the host received a termination signal.
    #[error("guest terminated by {0}")]
    Terminated(TerminationSignal),
}

impl BridgeError {
    /// Build a [`BridgeError::ProtocolViolation`] naming the offending value.
    pub fn protocol(value: impl fmt::Display, detail: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            value: value.to_string(),
            detail: detail.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ProtocolViolation { .. } => ErrorCategory::Protocol,
            Self::Unsupported(_) => ErrorCategory::Unsupported,
            Self::Engine(_) => ErrorCategory::Engine,
            Self::Io { .. } => ErrorCategory::Io,
            Self::Config(_) => ErrorCategory::Config,
            Self::Registry(_) => ErrorCategory::Registry,
            Self::Host(_) => ErrorCategory::Host,
            Self::Terminated(_) => ErrorCategory::Terminated,
        }
    }
}

/// Coarse classification of a [`BridgeError`], stable for tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Protocol,
    Unsupported,
    Engine,
    Io,
    Config,
    Registry,
    Host,
    Terminated,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Protocol => "protocol",
            Self::Unsupported => "unsupported",
            Self::Engine => "engine",
            Self::Io => "io",
            Self::Config => "config",
            Self::Registry => "registry",
            Self::Host => "host",
            Self::Terminated => "terminated",
        };
        f.write_str(text)
    }
}

/// Result alias used throughout the bridge.
pub type BridgeResult<T> = Result<T, BridgeError>;
