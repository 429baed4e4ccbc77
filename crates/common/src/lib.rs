//! Shared types for onionlink: error taxonomy, configuration and peer identity.

pub mod config;
pub mod error;

pub use config::{ConfigError, ControlAuth, KeyMode, TransportConfig};
pub use error::{Result, SessionError, TransportError};

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerIdError {
    #[error("peer id must not be empty")]
    Empty,
    #[error("invalid peer id hex: {0}")]
    InvalidHex(String),
}

/// Identity of the remote peer a dial is addressed to.
///
/// Opaque to the transport; it is handed to the connection upgrader, which
/// authenticates the remote end against it.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(Vec<u8>);

impl PeerId {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> std::result::Result<Self, PeerIdError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(PeerIdError::Empty);
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(hex_str: &str) -> std::result::Result<Self, PeerIdError> {
        let decoded =
            hex::decode(hex_str).map_err(|err| PeerIdError::InvalidHex(err.to_string()))?;
        Self::from_bytes(decoded)
    }

    /// First eight bytes as hex, for log lines
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..self.0.len().min(8)])
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({}...)", self.short_hex())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<&[u8]> for PeerId {
    type Error = PeerIdError;

    fn try_from(value: &[u8]) -> std::result::Result<Self, Self::Error> {
        Self::from_bytes(value)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
