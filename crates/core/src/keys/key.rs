use crate::address::OnionAddr;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use onionlink_common::config::keys::{KEY_FILE_SUFFIX, PEM_LABEL, RSA_KEY_BITS};
use onionlink_common::config::protocol::ONION_ID_BYTES;
use onionlink_common::Result as TransportResult;
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::fmt;
use std::path::{Path, PathBuf};

/// Prefix of the key blob handed to ADD_ONION
const KEY_BLOB_PREFIX: &str = "RSA1024:";

/// Private key of a legacy onion service, paired with its derived identity
#[derive(Clone)]
pub struct OnionKey {
    key: RsaPrivateKey,
    service_id: String,
}

impl OnionKey {
    /// Generate a new random 1024-bit service key
    pub fn generate() -> Result<Self, KeyError> {
        let key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)?;
        Self::from_private_key(key)
    }

    /// Wrap an existing private key, deriving its service identity
    pub fn from_private_key(key: RsaPrivateKey) -> Result<Self, KeyError> {
        let bits = key.size() * 8;
        if bits != RSA_KEY_BITS {
            return Err(KeyError::WrongKeySize(bits));
        }

        let service_id = service_id_from_public_key(&key.to_public_key())?;
        Ok(Self { key, service_id })
    }

    /// Decode a PKCS#1 "RSA PRIVATE KEY" PEM document
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        if !pem.contains(&format!("-----BEGIN {}-----", PEM_LABEL)) {
            return Err(KeyError::NotPkcs1);
        }

        let key = RsaPrivateKey::from_pkcs1_pem(pem)?;
        key.validate()?;
        Self::from_private_key(key)
    }

    /// Encode as a PKCS#1 PEM document
    pub fn to_pem(&self) -> Result<String, KeyError> {
        let pem = self.key.to_pkcs1_pem(LineEnding::LF)?;
        Ok(pem.as_str().to_owned())
    }

    /// The 16-character onion host this key serves
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Onion address of this service at `port`
    pub fn onion_addr(&self, port: u16) -> TransportResult<OnionAddr> {
        format!("{}:{}", self.service_id, port).parse()
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }

    /// Hex SHA-1 digest of the DER public key
    pub fn fingerprint(&self) -> Result<String, KeyError> {
        let der = self.key.to_public_key().to_pkcs1_der()?;
        Ok(hex::encode(Sha1::digest(der.as_bytes())))
    }

    /// Key material in the `RSA1024:<base64 DER>` form the control port accepts
    pub fn to_key_blob(&self) -> Result<String, KeyError> {
        let der = self.key.to_pkcs1_der()?;
        Ok(format!("{}{}", KEY_BLOB_PREFIX, STANDARD.encode(der.as_bytes())))
    }

    /// Canonical file name, `<service id>.onion_key`
    pub fn file_name(&self) -> String {
        format!("{}{}", self.service_id, KEY_FILE_SUFFIX)
    }

    /// Persist the key as PEM under `dir`, returning the written path
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf, KeyError> {
        let path = dir.join(self.file_name());
        std::fs::write(&path, self.to_pem()?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(path)
    }
}

impl fmt::Debug for OnionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnionKey")
            .field("service_id", &self.service_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Derive the onion host of a public key:
/// lower-case base32 of the first ten bytes of SHA-1 over its PKCS#1 DER form
pub fn service_id_from_public_key(key: &RsaPublicKey) -> Result<String, KeyError> {
    let der = key.to_pkcs1_der()?;
    let digest = Sha1::digest(der.as_bytes());
    Ok(data_encoding::BASE32
        .encode(&digest[..ONION_ID_BYTES])
        .to_lowercase())
}

/// Errors related to onion service keys
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Not a PKCS#1 \"RSA PRIVATE KEY\" PEM document")]
    NotPkcs1,

    #[error("Invalid PKCS#1 key: {0}")]
    Pkcs1(#[from] rsa::pkcs1::Error),

    #[error("Invalid RSA key: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("Expected a 1024 bit key, got {0} bits")]
    WrongKeySize(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
