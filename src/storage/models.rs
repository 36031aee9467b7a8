use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque version stamp the store assigns to every write of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub i64);

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optimistic-concurrency guard attached to a mutating store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precondition {
    /// Unconditional.
    #[default]
    None,
    /// The object must not exist yet (first write wins).
    DoesNotExist,
    /// The object's current generation must equal this one.
    GenerationMatch(Generation),
}

impl Precondition {
    /// Precondition that pins an object to what was observed earlier:
    /// its generation if it existed, "must not exist" otherwise.
    pub fn observed(meta: Option<&BlobMeta>) -> Self {
        match meta {
            Some(meta) => Precondition::GenerationMatch(meta.generation),
            None => Precondition::DoesNotExist,
        }
    }

    /// Value for the `ifGenerationMatch` query parameter, where 0 means "absent".
    pub fn if_generation_match(&self) -> Option<i64> {
        match self {
            Precondition::None => None,
            Precondition::DoesNotExist => Some(0),
            Precondition::GenerationMatch(generation) => Some(generation.0),
        }
    }
}

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    pub key: String,
    pub size: u64,
    pub updated: DateTime<Utc>,
    pub generation: Generation,
}

/// Result of a prefix listing.
///
/// With a delimiter, `items` only holds objects directly at the prefix level and
/// `prefixes` holds one entry per deeper level ("common prefixes", each ending
/// with the delimiter). Without a delimiter every object under the prefix is in
/// `items`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub items: Vec<BlobMeta>,
    pub prefixes: Vec<String>,
}
