//! The session document: the unit of remote synchronization.
//!
//! Writes always replace the whole document. Decoding is lenient because
//! other clients (and older revisions of this one) may omit fields: missing
//! or null collections decode as empty, a missing selection as none.

use crate::error::SyncError;
use crate::roster::Roster;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// The most recent draw and what to show for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub identifier: String,
    pub display_image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    #[serde(default)]
    pub initialized: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub roster: Vec<String>,
    /// Most recent first.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub drawn_set: Vec<String>,
    #[serde(default)]
    pub current_selection: Option<Selection>,
    /// Bumped by every local push. Informational only; writes are never
    /// conditional on it.
    #[serde(default)]
    pub revision: u64,
    /// Client that produced this write, if it said so.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer: Option<Uuid>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl SessionDocument {
    /// A freshly initialized session with nothing drawn.
    pub fn fresh(roster: &Roster) -> Self {
        Self {
            initialized: true,
            roster: roster.to_vec(),
            ..Self::default()
        }
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, SyncError> {
        serde_json::from_value(value).map_err(|e| SyncError::InvalidDocument(e.to_string()))
    }

    /// Enforce the local invariants: no duplicate roster entries, and the
    /// drawn set is a duplicate-free subset of the roster.
    ///
    /// Returns the cleaned document and whether anything was dropped.
    pub fn sanitized(mut self) -> (Self, bool) {
        let before = (self.roster.len(), self.drawn_set.len());

        let mut seen = HashSet::new();
        self.roster.retain(|id| seen.insert(id.clone()));

        let mut drawn = HashSet::new();
        let roster = &self.roster;
        self.drawn_set
            .retain(|id| roster.contains(id) && drawn.insert(id.clone()));

        let changed = before != (self.roster.len(), self.drawn_set.len());
        (self, changed)
    }
}
