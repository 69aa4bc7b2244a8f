//! File-backed [`KeyStore`] for spinsync.
//!
//! Remembers the last explicitly supplied session key on this device so a
//! restart without a session parameter rejoins the same session. Only the key
//! is stored; the session projection is always re-derived from the remote
//! store.
//!
//! The file is small JSON:
//!
//! ```json
//! { "sessionKey": "friday-night" }
//! ```

use serde::{Deserialize, Serialize};
use spinsync::{KeyStore, SessionKey};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_FILE_NAME: &str = "spinsync-session.json";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt key file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredKey {
    session_key: SessionKey,
}

/// Stores the session key in a JSON file.
///
/// Writes go through a sibling temp file and a rename, so a crash mid-write
/// leaves either the old key or the new one.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Key file named [`DEFAULT_FILE_NAME`] inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(DEFAULT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_key(&self) -> Result<Option<SessionKey>, PersistenceError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let stored: StoredKey =
            serde_json::from_str(&raw).map_err(|source| PersistenceError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(stored.session_key))
    }

    pub fn write_key(&self, key: &SessionKey) -> Result<(), PersistenceError> {
        let io_err = |source: io::Error| PersistenceError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let stored = StoredKey {
            session_key: key.clone(),
        };
        let body = serde_json::to_vec_pretty(&stored).map_err(|source| {
            PersistenceError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        tracing::debug!(path = %self.path.display(), session = %key, "stored session key");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), PersistenceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistenceError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self) -> anyhow::Result<Option<SessionKey>> {
        Ok(self.read_key()?)
    }

    fn save(&self, key: &SessionKey) -> anyhow::Result<()> {
        Ok(self.write_key(key)?)
    }
}
