use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Field-name to value mapping carried by event payloads and read-model documents.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Identifier of a product aggregate.
///
/// Generated as a UUID string on creation, but any string received from a
/// caller is accepted so that ids stay stable across the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(String);

impl AggregateId {
    /// Creates a new random aggregate ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the id, returning the owned string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AggregateId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for AggregateId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<Uuid> for AggregateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl AsRef<str> for AggregateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
