//! Session configuration.
//!
//! Every field has a default, so a config file only needs to name what it
//! overrides:
//!
//! ```json
//! { "defaultKey": "friday-night", "startupTimeoutMs": 2000 }
//! ```

use crate::error::ConfigError;
use crate::identity::DEFAULT_SESSION_KEY;
use crate::roster::{default_images, DrawPolicy, ImageCatalog, Roster, DEFAULT_PLACEHOLDER_IMAGE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// How long a client waits for the remote store before seeding locally.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a fresh selection stays celebrated before auto-dismissal.
pub const DEFAULT_CELEBRATION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Key used when no session parameter was supplied or remembered.
    pub default_key: String,
    /// Canonical roster for fresh sessions and resets.
    pub roster: Vec<String>,
    pub images: HashMap<String, String>,
    pub placeholder_image: String,
    /// Draw priority; identifiers not listed fall back to roster order.
    pub priority: Vec<String>,
    pub startup_timeout_ms: u64,
    pub celebration_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_key: DEFAULT_SESSION_KEY.to_string(),
            roster: Roster::default().to_vec(),
            images: default_images(),
            placeholder_image: DEFAULT_PLACEHOLDER_IMAGE.to_string(),
            priority: Vec::new(),
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT.as_millis() as u64,
            celebration_timeout_ms: DEFAULT_CELEBRATION_TIMEOUT.as_millis() as u64,
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Roster::new(self.roster.iter().cloned()).map(|_| ())
    }

    /// Validated roster. Falls back to the built-in roster if the configured
    /// one is invalid, so a bad config never blocks a client.
    pub fn roster(&self) -> Roster {
        Roster::new(self.roster.iter().cloned()).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "invalid configured roster, using built-in roster");
            Roster::default()
        })
    }

    pub fn catalog(&self) -> ImageCatalog {
        ImageCatalog::new(self.images.clone(), self.placeholder_image.clone())
    }

    pub fn policy(&self) -> DrawPolicy {
        DrawPolicy::new(self.priority.clone())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn celebration_timeout(&self) -> Duration {
        Duration::from_millis(self.celebration_timeout_ms)
    }
}
