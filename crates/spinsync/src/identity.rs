//! Session identity resolution.
//!
//! A client resolves its session key exactly once at startup:
//!
//! 1. An explicit session parameter wins and is remembered on this device.
//! 2. Otherwise a key remembered from an earlier explicit parameter is reused.
//! 3. Otherwise everyone lands on the shared default key.
//!
//! Resolution never fails. Persistence problems are logged and ignored.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use url::{form_urlencoded, Url};

/// Well-known key shared by every client that was not given one.
pub const DEFAULT_SESSION_KEY: &str = "jjk-default-group";

/// Name of the query parameter carrying a session key.
pub const SESSION_PARAM: &str = "session";

/// Identifies which session document a client reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Link that drops another device into this session. The key is
    /// percent-encoded, so any key survives the round trip through
    /// [`session_param_from_query`].
    pub fn share_link(&self, base_url: &str) -> String {
        match Url::parse(base_url) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair(SESSION_PARAM, &self.0);
                url.into()
            }
            Err(_) => {
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair(SESSION_PARAM, &self.0)
                    .finish();
                format!("{base_url}?{query}")
            }
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pull the decoded session parameter out of a query string such as
/// `?session=abc&x=1`.
pub fn session_param_from_query(query: &str) -> Option<String> {
    form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .find(|(name, _)| name == SESSION_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.trim().is_empty())
}

/// Device-local storage for the last explicitly supplied session key.
pub trait KeyStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionKey>>;
    fn save(&self, key: &SessionKey) -> Result<()>;
}

/// Process-lifetime key store, for tests and clients without local storage.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    slot: Mutex<Option<SessionKey>>,
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Result<Option<SessionKey>> {
        Ok(self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("key store lock poisoned"))?
            .clone())
    }

    fn save(&self, key: &SessionKey) -> Result<()> {
        *self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("key store lock poisoned"))? = Some(key.clone());
        Ok(())
    }
}

pub struct SessionIdentityResolver {
    store: Arc<dyn KeyStore>,
    default_key: SessionKey,
}

impl SessionIdentityResolver {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            default_key: SessionKey::new(DEFAULT_SESSION_KEY),
        }
    }

    pub fn with_default_key(mut self, key: impl Into<String>) -> Self {
        self.default_key = SessionKey::new(key);
        self
    }

    pub fn resolve(&self, param: Option<&str>) -> SessionKey {
        if let Some(param) = param.map(str::trim).filter(|p| !p.is_empty()) {
            let key = SessionKey::new(param);
            if let Err(err) = self.store.save(&key) {
                tracing::warn!(session = %key, error = %err, "failed to remember session key");
            }
            tracing::debug!(session = %key, "session key from parameter");
            return key;
        }

        match self.store.load() {
            Ok(Some(key)) => {
                tracing::debug!(session = %key, "session key remembered on this device");
                key
            }
            Ok(None) => self.default_key.clone(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to load remembered session key");
                self.default_key.clone()
            }
        }
    }
}
