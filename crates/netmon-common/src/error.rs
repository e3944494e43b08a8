//! Error types for netmon operations.
//!
//! Transport errors (`Connection`, `Auth`, `Timeout`) and extractor errors
//! (`Parse`) fail a single poll cycle. `Storage` errors only degrade
//! persistence. Nothing here is ever allowed to take down the daemon.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for netmon operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors that can occur while monitoring devices.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The device could not be reached or the session broke mid-exchange.
    #[error("Connection to '{device}' failed: {message}")]
    Connection {
        /// Device name or address.
        device: String,
        /// Error message.
        message: String,
    },

    /// The device rejected the supplied credentials.
    #[error("Authentication to '{device}' failed: {message}")]
    Auth {
        /// Device name or address.
        device: String,
        /// Error message.
        message: String,
    },

    /// A command exchange exceeded its hard timeout.
    #[error("Command '{command}' on '{device}' timed out after {}s", .after.as_secs())]
    Timeout {
        /// Device name or address.
        device: String,
        /// The command that was running.
        command: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// Command output could not be turned into typed records.
    #[error("Cannot parse '{command}' output for platform '{platform}': {reason}")]
    Parse {
        /// Platform tag of the device.
        platform: String,
        /// The command whose output was rejected.
        command: String,
        /// Why the output was rejected.
        reason: String,
    },

    /// Persisting metrics or alerts failed.
    #[error("Storage operation failed: {operation}: {message}")]
    Storage {
        /// The operation that failed (e.g., "append_metrics").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    Config {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl MonitorError {
    /// Creates a connection error.
    pub fn connection(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    pub fn auth(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(device: impl Into<String>, command: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            device: device.into(),
            command: command.into(),
            after,
        }
    }

    /// Creates a parse error.
    pub fn parse(
        platform: impl Into<String>,
        command: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Parse {
            platform: platform.into(),
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Creates a storage error.
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors raised by the remote-shell transport.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MonitorError::Connection { .. } | MonitorError::Auth { .. } | MonitorError::Timeout { .. }
        )
    }

    /// Short machine-readable name of the error class, used as a log and
    /// metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::Connection { .. } => "connection",
            MonitorError::Auth { .. } => "auth",
            MonitorError::Timeout { .. } => "timeout",
            MonitorError::Parse { .. } => "parse",
            MonitorError::Storage { .. } => "storage",
            MonitorError::Config { .. } => "config",
            MonitorError::Io(_) => "io",
        }
    }
}
