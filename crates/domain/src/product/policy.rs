use std::str::FromStr;

use thiserror::Error;

/// How update and delete treat aggregates that are absent or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistencePolicy {
    /// Reject with `AggregateNotFound` unless the product exists and is not deleted.
    #[default]
    Strict,
    /// Append regardless of history.
    Permissive,
}

impl ExistencePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExistencePolicy::Strict => "strict",
            ExistencePolicy::Permissive => "permissive",
        }
    }
}

impl std::fmt::Display for ExistencePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown existence policy: {0} (expected strict or permissive)")]
pub struct UnknownExistencePolicy(pub String);

impl FromStr for ExistencePolicy {
    type Err = UnknownExistencePolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ExistencePolicy::Strict),
            "permissive" => Ok(ExistencePolicy::Permissive),
            _ => Err(UnknownExistencePolicy(s.to_string())),
        }
    }
}
