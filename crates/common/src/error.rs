use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the onion transport and its wrappers
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Malformed onion address: {0}")]
    MalformedAddress(String),

    #[error("Invalid onion port: {0}")]
    InvalidPort(String),

    #[error("No private key loaded for onion service {0}")]
    KeyNotFound(String),

    #[error("Failed to decode key file {path}: {reason}")]
    KeyDecode { path: PathBuf, reason: String },

    #[error("Failed to read key directory {path}")]
    KeyDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Control session error: {0}")]
    Session(#[from] SessionError),

    #[error("Connection upgrade failed: {0}")]
    Upgrade(#[source] anyhow::Error),

    #[error("Listener is closed")]
    ClosedListener,

    #[error("Address not supported by this transport: {0}")]
    Unsupported(String),

    #[error("Onion protocols are not registered; call register_protocols() at startup")]
    NotRegistered,

    #[error("Transport is closed")]
    TransportClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedAddress(msg.into())
    }

    pub fn invalid_port(msg: impl Into<String>) -> Self {
        Self::InvalidPort(msg.into())
    }

    pub fn key_decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::KeyDecode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error means the listener was shut down on purpose
    pub fn is_closed_listener(&self) -> bool {
        matches!(self, Self::ClosedListener)
    }
}

/// Errors reported by a control-port session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Session is not authenticated")]
    NotAuthenticated,

    #[error("{command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Session is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            reason: reason.into(),
        }
    }
}
