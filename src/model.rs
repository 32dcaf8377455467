//! Curation state shared by the normalizer, the orchestrator, and the surface.
//!
//! The wire format keeps the empty string as the "ungrounded" marker, but
//! inside the crate that state is the explicit `Grounding::Ungrounded`
//! variant so it never collides with a real identifier.
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Grounding assigned to a longform.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Grounding {
    #[default]
    Ungrounded,
    Assigned(String),
}

impl Grounding {
    /// Build a grounding from a wire value; the empty string means ungrounded.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.is_empty() {
            Grounding::Ungrounded
        } else {
            Grounding::Assigned(raw)
        }
    }

    /// Wire representation (`""` for ungrounded).
    pub fn as_str(&self) -> &str {
        match self {
            Grounding::Ungrounded => "",
            Grounding::Assigned(id) => id,
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, Grounding::Assigned(_))
    }
}

impl fmt::Display for Grounding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grounding::Ungrounded => write!(f, "<ungrounded>"),
            Grounding::Assigned(id) => write!(f, "{id}"),
        }
    }
}

impl From<&str> for Grounding {
    fn from(raw: &str) -> Self {
        Grounding::new(raw)
    }
}

impl Serialize for Grounding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Grounding {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Grounding::new(raw))
    }
}

/// Longform -> grounding; one entry per longform in a normalized state.
pub type GroundingMap = BTreeMap<String, Grounding>;

/// Grounding -> standardized display name.
pub type NamesMap = BTreeMap<Grounding, String>;

/// Groundings accepted as positive training labels.
pub type PositiveLabels = BTreeSet<String>;

/// Normalized initial state handed to the surface, and the curated result
/// read back from the completion artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CurationState {
    pub grounding_map: GroundingMap,
    pub names: NamesMap,
    pub pos_labels: PositiveLabels,
}

impl CurationState {
    /// Grounding currently assigned to `longform`, if the longform is known.
    pub fn grounding_of(&self, longform: &str) -> Option<&Grounding> {
        self.grounding_map.get(longform)
    }

    /// Display name resolved through the longform's grounding.
    ///
    /// Unknown longforms and unnamed groundings both resolve to `""`.
    pub fn name_of(&self, longform: &str) -> &str {
        self.grounding_of(longform)
            .and_then(|grounding| self.names.get(grounding))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Distinct groundings assigned to at least one longform.
    pub fn assigned_groundings(&self) -> BTreeSet<&Grounding> {
        self.grounding_map
            .values()
            .filter(|grounding| grounding.is_assigned())
            .collect()
    }
}

/// Caller-supplied input for one curation session.
///
/// Seeds use raw wire strings; `normalize` turns them into a `CurationState`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurationRequest {
    pub longforms: Vec<String>,
    pub scores: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding_map: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos_labels: Option<Vec<String>>,
}
