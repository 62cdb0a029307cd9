// Per-Container Exclusion
//
// One in-process mutex per container path. Appends to the same
// container are serialized across their whole read-modify-rewrite
// cycle; appends to different containers never contend.
// Cross-process locking is not provided.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct ContainerLocks {
    slots: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ContainerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `container`.
    pub fn with_lock<R>(&self, container: &Path, f: impl FnOnce() -> R) -> R {
        let slot = self.slot(container);
        let result = {
            let _held = slot.lock();
            f()
        };
        drop(slot);

        // Forget slots nobody holds or waits on.
        self.slots.lock().retain(|_, s| Arc::strong_count(s) > 1);
        result
    }

    /// Number of containers currently tracked.
    pub fn tracked(&self) -> usize {
        self.slots.lock().len()
    }

    fn slot(&self, container: &Path) -> Arc<Mutex<()>> {
        let key = lock_key(container);
        self.slots.lock().entry(key).or_default().clone()
    }
}

/// Resolve the parent directory so different spellings of one path
/// share a lock. Falls back to the path as given.
fn lock_key(container: &Path) -> PathBuf {
    let (Some(parent), Some(name)) = (container.parent(), container.file_name()) else {
        return container.to_path_buf();
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    fs::canonicalize(parent)
        .map(|dir| dir.join(name))
        .unwrap_or_else(|_| container.to_path_buf())
}
