// Snapshot Container Storage Abstraction
//
// Defines the contract between the archive and whatever holds the
// per-document container on disk (or in memory, for tests).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::ArchiveError;

/// Name → bytes for every entry of one container.
pub type EntrySet = BTreeMap<String, Vec<u8>>;

/// Storage backend for snapshot containers.
///
/// Properties required from implementations:
/// - Whole-container replacement is all-or-nothing
/// - Entry bytes are returned exactly as written
///
/// Implementations MUST NOT:
/// - Modify entries outside `replace`
/// - Touch any container other than the one addressed
pub trait ContainerStore: Send + Sync {
    /// Whether a container exists at `container`.
    fn exists(&self, container: &Path) -> Result<bool, ArchiveError>;

    /// Entry names, sorted ascending.
    fn list(&self, container: &Path) -> Result<Vec<String>, ArchiveError>;

    /// Load every entry into memory.
    fn load(&self, container: &Path) -> Result<EntrySet, ArchiveError>;

    /// Replace the container with exactly `entries`, creating it if needed.
    fn replace(&self, container: &Path, entries: &EntrySet) -> Result<(), ArchiveError>;
}

/// Volatile store keyed by container path.
#[derive(Debug, Default)]
pub struct InMemoryContainerStore {
    containers: Mutex<HashMap<PathBuf, EntrySet>>,
}

impl InMemoryContainerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn container_count(&self) -> usize {
        self.containers.lock().len()
    }
}

impl ContainerStore for InMemoryContainerStore {
    fn exists(&self, container: &Path) -> Result<bool, ArchiveError> {
        Ok(self.containers.lock().contains_key(container))
    }

    fn list(&self, container: &Path) -> Result<Vec<String>, ArchiveError> {
        Ok(self
            .containers
            .lock()
            .get(container)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn load(&self, container: &Path) -> Result<EntrySet, ArchiveError> {
        Ok(self
            .containers
            .lock()
            .get(container)
            .cloned()
            .unwrap_or_default())
    }

    fn replace(&self, container: &Path, entries: &EntrySet) -> Result<(), ArchiveError> {
        self.containers
            .lock()
            .insert(container.to_path_buf(), entries.clone());
        Ok(())
    }
}
