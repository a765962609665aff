//! # Encryption key storage
//!
//! The encrypted index can only be opened with the key that created it, so the key has to
//! outlive the process. [`FileKeyStore`] keeps it as a single opaque binary blob on disk;
//! [`EphemeralKeyStore`] keeps it in memory for deployments that run with key persistence
//! disabled (every restart then produces a new key and, with recovery enabled, a rebuilt
//! index).
//!
//! Absence of a key is a normal, distinguishable state: [`KeyStore::read`] returns
//! `Ok(None)` and the lifecycle manager generates a fresh key. Any other I/O problem, or a
//! blob that is not exactly [`KEY_LENGTH`] bytes, is reported as
//! [`SupportError::KeyStoreUnavailable`] and is fatal at startup.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{SupportError, SupportResult};

/// Length of keys produced by the vector service.
pub const KEY_LENGTH: usize = 32;

/// Opaque key material bound to one remote index.
///
/// `Debug` never prints the bytes, only [`EncryptionKey::fingerprint`].
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey(Vec<u8>);

impl EncryptionKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First 12 hex characters of the SHA-256 of the key. Safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = sha256::digest(self.0.as_slice());
        digest[..12].to_string()
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("len", &self.0.len())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl From<Vec<u8>> for EncryptionKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Durable storage for exactly one [`EncryptionKey`].
pub trait KeyStore: Send + Sync {
    /// Return the stored key, or `None` when nothing has been stored yet.
    fn read(&self) -> SupportResult<Option<EncryptionKey>>;

    /// Store `key`, replacing any previous one.
    fn write(&self, key: &EncryptionKey) -> SupportResult<()>;

    /// Remove the stored key. Removing an absent key is not an error.
    fn delete(&self) -> SupportResult<()>;

    /// Human readable location, used in logs and errors.
    fn location(&self) -> String;
}

/// Key blob stored in a single file.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, err: io::Error) -> SupportError {
        SupportError::KeyStoreUnavailable {
            location: self.location(),
            reason: err.to_string(),
        }
    }

    /// Write to a sibling temp file, sync it, then rename over the target so a crash never
    /// leaves a truncated key behind.
    fn write_atomically(&self, bytes: &[u8]) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl KeyStore for FileKeyStore {
    fn read(&self) -> SupportResult<Option<EncryptionKey>> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.len() != KEY_LENGTH => Err(SupportError::KeyStoreUnavailable {
                location: self.location(),
                reason: format!(
                    "key blob is {} bytes, expected {KEY_LENGTH}",
                    bytes.len()
                ),
            }),
            Ok(bytes) => {
                info!(
                    "Loading existing encryption key from {}",
                    self.path.display()
                );
                Ok(Some(EncryptionKey::from(bytes)))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("No encryption key at {}", self.path.display());
                Ok(None)
            }
            Err(err) => Err(self.unavailable(err)),
        }
    }

    fn write(&self, key: &EncryptionKey) -> SupportResult<()> {
        self.write_atomically(key.as_bytes())
            .map_err(|e| self.unavailable(e))?;
        info!("Saved encryption key to {}", self.path.display());
        Ok(())
    }

    fn delete(&self) -> SupportResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Deleted {}", self.path.display());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.unavailable(err)),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Process-local key storage used when key persistence is disabled.
#[derive(Debug, Default)]
pub struct EphemeralKeyStore {
    key: Mutex<Option<EncryptionKey>>,
}

impl EphemeralKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: EncryptionKey) -> Self {
        Self {
            key: Mutex::new(Some(key)),
        }
    }
}

impl KeyStore for EphemeralKeyStore {
    fn read(&self) -> SupportResult<Option<EncryptionKey>> {
        Ok(self
            .key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn write(&self, key: &EncryptionKey) -> SupportResult<()> {
        *self.key.lock().unwrap_or_else(PoisonError::into_inner) = Some(key.clone());
        Ok(())
    }

    fn delete(&self) -> SupportResult<()> {
        *self.key.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
