use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Address and protocol constants
pub mod protocol {
    /// Multiaddr protocol code for legacy onion addresses
    pub const ONION_CODE: u32 = 444;

    /// Multiaddr protocol code for TCP
    pub const TCP_CODE: u32 = 6;

    /// Length of an onion host without the ".onion" suffix
    pub const ONION_HOST_LEN: usize = 16;

    /// Number of identity digest bytes encoded into the onion host
    pub const ONION_ID_BYTES: usize = 10;

    /// Default Tor control port
    pub const DEFAULT_CONTROL_PORT: u16 = 9051;
}

/// Key material constants
pub mod keys {
    /// Suffix of hidden-service private key files
    pub const KEY_FILE_SUFFIX: &str = ".onion_key";

    /// Modulus size of legacy hidden-service keys
    pub const RSA_KEY_BITS: usize = 1024;

    /// PEM label of the key container
    pub const PEM_LABEL: &str = "RSA PRIVATE KEY";
}

/// Listener constants
pub mod listener {
    use std::time::Duration;

    /// Upgraded inbound connections buffered ahead of `accept`
    pub const ACCEPT_BACKLOG: usize = 32;

    /// Pause after a failed accept on the forwarding socket
    pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);
}

/// Credentials presented to the control port
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ControlAuth {
    /// Control port accepts unauthenticated sessions
    #[default]
    None,

    /// HashedControlPassword authentication
    Password { password: String },

    /// Cookie file authentication
    Cookie { path: PathBuf },
}

/// What to do when the key directory holds no keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyMode {
    /// Only load existing keys; listening on an unknown service fails
    #[default]
    LoadOnly,

    /// Generate and persist one fresh key if the directory has none
    GenerateIfEmpty,
}

/// Onion transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Network of the control port ("tcp" or "unix")
    pub control_network: String,

    /// Control port address
    pub control_addr: String,

    /// Directory holding `.onion_key` files
    pub key_dir: PathBuf,

    /// Refuse non-onion addresses
    pub only_onion: bool,

    /// Key loading policy
    #[serde(default)]
    pub key_mode: KeyMode,

    /// Control port credentials
    #[serde(default)]
    pub auth: ControlAuth,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            control_network: "tcp".to_string(),
            control_addr: format!("127.0.0.1:{}", protocol::DEFAULT_CONTROL_PORT),
            key_dir: PathBuf::from("./keys"),
            only_onion: true,
            key_mode: KeyMode::LoadOnly,
            auth: ControlAuth::None,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_control_addr(mut self, network: impl Into<String>, addr: impl Into<String>) -> Self {
        self.control_network = network.into();
        self.control_addr = addr.into();
        self
    }

    pub fn with_auth(mut self, auth: ControlAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_key_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.key_dir = dir.into();
        self
    }

    pub fn with_only_onion(mut self, only_onion: bool) -> Self {
        self.only_onion = only_onion;
        self
    }

    pub fn with_key_mode(mut self, mode: KeyMode) -> Self {
        self.key_mode = mode;
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),
}
