//! Roster, display images, and the deterministic draw policy.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Fixed, ordered list of selectable identifiers.
///
/// Order is wheel order and must be identical on every client, so the roster
/// never shrinks as items are drawn. Drawn state is tracked separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster(Vec<String>);

impl Roster {
    /// Build a roster, rejecting empty lists and duplicate identifiers.
    pub fn new<I, S>(items: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items: Vec<String> = items.into_iter().map(Into::into).collect();
        if items.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(item.as_str()) {
                return Err(ConfigError::DuplicateIdentifier(item.clone()));
            }
        }
        Ok(Self(items))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self(DEFAULT_ROSTER.iter().map(|name| name.to_string()).collect())
    }
}

/// Identifiers a fresh session starts with.
pub const DEFAULT_ROSTER: [&str; 16] = [
    "Gojo Satoru",
    "Ryomen Sukuna",
    "Toji Fushiguro",
    "Suguru Geto",
    "Yuta Okkotsu",
    "Maki Zenin",
    "Mahoraga",
    "Megumi Fushiguro",
    "Yuji Itadori",
    "Nanami Kento",
    "Choso",
    "Nobara Kugisaki",
    "Mahito",
    "Jogo",
    "Yuki Tsukumo",
    "Hakari",
];

pub const DEFAULT_PLACEHOLDER_IMAGE: &str = "/images/placeholder.svg";

pub(crate) fn default_images() -> HashMap<String, String> {
    [
        ("Gojo Satoru", "/images/gojo.jpeg"),
        ("Ryomen Sukuna", "/images/sukuna.jpeg"),
        ("Toji Fushiguro", "/images/toji.jpg"),
        ("Suguru Geto", "/images/geto.jpeg"),
        ("Yuta Okkotsu", "/images/yuta.jpg"),
        ("Maki Zenin", "/images/maki.jpeg"),
        ("Mahoraga", "/images/mahoraga.jpeg"),
        ("Megumi Fushiguro", "/images/megumi.jpeg"),
        ("Yuji Itadori", "/images/yuji.jpeg"),
        ("Nanami Kento", "/images/nanami.jpeg"),
        ("Choso", "/images/choso.jpeg"),
        ("Nobara Kugisaki", "/images/nobara.jpeg"),
        ("Mahito", "/images/mahito.jpeg"),
        ("Jogo", "/images/jogo.jpg"),
        ("Yuki Tsukumo", "/images/yuki.jpeg"),
        ("Hakari", "/images/hakari.jpeg"),
    ]
    .into_iter()
    .map(|(name, path)| (name.to_string(), path.to_string()))
    .collect()
}

/// Maps identifiers to the image shown when they are drawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCatalog {
    images: HashMap<String, String>,
    placeholder: String,
}

impl ImageCatalog {
    pub fn new(images: HashMap<String, String>, placeholder: impl Into<String>) -> Self {
        Self {
            images,
            placeholder: placeholder.into(),
        }
    }

    /// Image for `identifier`, or the placeholder when none is registered.
    pub fn image_for(&self, identifier: &str) -> String {
        self.images
            .get(identifier)
            .cloned()
            .unwrap_or_else(|| self.placeholder.clone())
    }
}

/// Authoritative choice of the next identifier.
///
/// The priority order is plain data: the first listed identifier that is on
/// the roster and not yet drawn wins, otherwise the first undrawn identifier
/// in roster order. Every client holding the same projection computes the
/// same answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrawPolicy {
    priority: Vec<String>,
}

impl DrawPolicy {
    pub fn new(priority: Vec<String>) -> Self {
        Self { priority }
    }

    pub fn next<'a>(&self, roster: &'a [String], drawn: &[String]) -> Option<&'a str> {
        let undrawn = |id: &&'a String| !drawn.contains(*id);
        self.priority
            .iter()
            .find_map(|wanted| roster.iter().filter(undrawn).find(|id| *id == wanted))
            .or_else(|| roster.iter().find(undrawn))
            .map(String::as_str)
    }
}

/// Identifiers on the roster that have not been drawn, in roster order.
pub fn undrawn<'a>(roster: &'a [String], drawn: &[String]) -> Vec<&'a str> {
    roster
        .iter()
        .filter(|id| !drawn.contains(id))
        .map(String::as_str)
        .collect()
}

/// Cosmetic instructions for the wheel animation.
///
/// `wheel_index` is the slot of the already-chosen identifier in the fixed
/// roster; `extra_turns` is decoration only and carries no meaning for the
/// draw itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpinPlan {
    pub wheel_index: usize,
    pub extra_turns: u8,
}

impl SpinPlan {
    pub fn landing_on(wheel_index: usize) -> Self {
        Self {
            wheel_index,
            extra_turns: fastrand::u8(3..=6),
        }
    }
}
