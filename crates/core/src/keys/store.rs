use super::key::{KeyError, OnionKey};
use onionlink_common::config::keys::KEY_FILE_SUFFIX;
use onionlink_common::{Result, TransportError};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Onion service keys indexed by their derived service identity.
///
/// Read once at startup and never modified by the transport afterwards.
#[derive(Debug, Default)]
pub struct KeyStore {
    keys: HashMap<String, OnionKey>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recursively load every `*.onion_key` file under `dir`.
    ///
    /// A file that fails to decode aborts the whole load. Files without the
    /// suffix are ignored. Keys are indexed by the identity derived from the
    /// key material, not by file name.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();

        let metadata = std::fs::metadata(dir).map_err(|source| TransportError::KeyDirectory {
            path: dir.to_path_buf(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(TransportError::KeyDirectory {
                path: dir.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            });
        }

        let mut store = Self::new();

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|err| TransportError::KeyDirectory {
                path: err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| dir.to_path_buf()),
                source: io::Error::from(err),
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy();
            let Some(stem) = file_name.strip_suffix(KEY_FILE_SUFFIX) else {
                debug!("Skipping non-key file {:?}", path);
                continue;
            };

            let bytes = std::fs::read(path).map_err(|source| TransportError::KeyDirectory {
                path: path.to_path_buf(),
                source,
            })?;
            let pem = String::from_utf8(bytes)
                .map_err(|_| TransportError::key_decode(path, "file is not UTF-8 text"))?;
            let key = OnionKey::from_pem(&pem).map_err(|e| TransportError::key_decode(path, e))?;

            if !stem.eq_ignore_ascii_case(key.service_id()) {
                warn!(
                    "Key file {:?} holds the key for {}, not {}",
                    path,
                    key.service_id(),
                    stem
                );
            }

            if store.contains(key.service_id()) {
                warn!(
                    "Duplicate key for {} in {:?}, keeping the first one",
                    key.service_id(),
                    path
                );
                continue;
            }

            debug!("Loaded onion key {} from {:?}", key.service_id(), path);
            store.insert(key);
        }

        info!("Loaded {} onion key(s) from {:?}", store.len(), dir);
        Ok(store)
    }

    /// Load keys from `dir`, creating it and one fresh key if it holds none
    pub fn load_or_generate(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();

        std::fs::create_dir_all(dir).map_err(|source| TransportError::KeyDirectory {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut store = Self::load(dir)?;
        if store.is_empty() {
            let key = OnionKey::generate().map_err(|e| io::Error::other(e.to_string()))?;
            let path = key.write_to_dir(dir).map_err(|e| match e {
                KeyError::Io(source) => TransportError::KeyDirectory {
                    path: dir.to_path_buf(),
                    source,
                },
                other => TransportError::key_decode(dir, other),
            })?;

            info!("Generated onion key {} at {:?}", key.service_id(), path);
            store.insert(key);
        }

        Ok(store)
    }

    /// Add a key, returning any key previously held for the same identity
    pub fn insert(&mut self, key: OnionKey) -> Option<OnionKey> {
        self.keys.insert(key.service_id().to_string(), key)
    }

    /// Find the key for a service identity (case-insensitive)
    pub fn lookup(&self, service_id: &str) -> Option<&OnionKey> {
        self.keys.get(&service_id.to_ascii_lowercase())
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.lookup(service_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Loaded service identities, sorted
    pub fn identities(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &OnionKey> {
        self.keys.values()
    }
}
