// Archive Configuration
//
// Tunables for the snapshot archive. The defaults reproduce the
// historical on-disk layout exactly.

use serde::{Deserialize, Serialize};

/// Number of snapshots retained per document unless configured otherwise.
pub const MAX_ENTRIES: usize = 10;

/// Suffix appended to the document stem to locate its container.
pub const DEFAULT_CONTAINER_SUFFIX: &str = ".bak.zip";

/// What to do when the candidate entry name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Keep both snapshots by suffixing the later one with `_NN`.
    #[default]
    Disambiguate,

    /// Overwrite the existing entry with the new payload.
    Replace,
}

/// Archive configuration loaded from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub max_entries: usize,
    pub container_suffix: String,
    pub collision: CollisionPolicy,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_entries must be at least 1")]
    ZeroCapacity,

    #[error("container_suffix must not be empty or contain a path separator")]
    InvalidSuffix,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_entries: MAX_ENTRIES,
            container_suffix: DEFAULT_CONTAINER_SUFFIX.into(),
            collision: CollisionPolicy::default(),
        }
    }
}

impl ArchiveConfig {
    /// Parse a JSON document; missing fields fall back to defaults.
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.container_suffix.is_empty()
            || self.container_suffix.contains(std::path::is_separator)
        {
            return Err(ConfigError::InvalidSuffix);
        }
        Ok(())
    }
}
