// Snapshot Archive
//
// Appends a dated snapshot of a document into its rolling container
// and prunes the container to the configured capacity. All state lives
// in the container; the archive itself keeps none between calls.

pub mod codec;
pub mod store;

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::{ArchiveConfig, ConfigError};
use crate::invariants::{InvariantEngine, InvariantViolation, RotationContext};
use crate::lock::ContainerLocks;
use crate::naming::{ContainerLocation, NamingError};
use crate::rotation::plan_rotation;

pub use codec::ZipContainerStore;
pub use store::{ContainerStore, EntrySet, InMemoryContainerStore};

/// Coarse classification of [`ArchiveError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Access,
    Format,
    Read,
    Write,
    Naming,
    Invariant,
}

/// Errors returned by [`SnapshotArchive::append`].
///
/// Every variant means the snapshot for that call was not persisted.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("cannot access container {path}: {source}")]
    Access {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("container {path} is not a valid archive: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("cannot read entry `{entry}` from {path}: {source}")]
    Read {
        path: PathBuf,
        entry: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot write container {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("naming failed: {0}")]
    Naming(#[from] NamingError),

    #[error("rotation rejected: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::Access { .. } => ErrorKind::Access,
            ArchiveError::Format { .. } => ErrorKind::Format,
            ArchiveError::Read { .. } => ErrorKind::Read,
            ArchiveError::Write { .. } => ErrorKind::Write,
            ArchiveError::Naming(_) => ErrorKind::Naming,
            ArchiveError::Invariant(_) => ErrorKind::Invariant,
        }
    }
}

/// What a successful append did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppendOutcome {
    pub container: PathBuf,
    pub entry: String,
    pub created: bool,
    pub evicted: Vec<String>,
}

/// Bounded, per-document snapshot archive.
pub struct SnapshotArchive<S = ZipContainerStore, C = SystemClock> {
    store: S,
    clock: C,
    config: ArchiveConfig,
    invariants: InvariantEngine,
    locks: ContainerLocks,
}

impl SnapshotArchive {
    /// Zip containers on disk, system clock.
    pub fn new(config: ArchiveConfig) -> Result<Self, ConfigError> {
        Self::with_parts(ZipContainerStore::default(), SystemClock, config)
    }
}

impl<S: ContainerStore, C: Clock> SnapshotArchive<S, C> {
    pub fn with_parts(store: S, clock: C, config: ArchiveConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            clock,
            config,
            invariants: InvariantEngine::standard(),
            locks: ContainerLocks::new(),
        })
    }

    /// Replace the invariants checked before every rewrite.
    pub fn with_invariants(mut self, invariants: InvariantEngine) -> Self {
        self.invariants = invariants;
        self
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn location(&self, document: &Path) -> Result<ContainerLocation, ArchiveError> {
        Ok(ContainerLocation::for_document(document, &self.config)?)
    }

    /// Append `payload` as a new snapshot of `document`.
    ///
    /// Blocks for the whole read-merge-prune-rewrite cycle. Concurrent
    /// appends to the same container within this archive are serialized.
    pub fn append(&self, document: &Path, payload: &[u8]) -> Result<AppendOutcome, ArchiveError> {
        let location = self.location(document)?;
        self.locks
            .with_lock(&location.container, || self.append_locked(&location, payload))
    }

    /// Entry names in the document's container, oldest first.
    pub fn entries(&self, document: &Path) -> Result<Vec<String>, ArchiveError> {
        let location = self.location(document)?;
        if !self.store.exists(&location.container)? {
            return Ok(Vec::new());
        }
        self.store.list(&location.container)
    }

    fn append_locked(
        &self,
        location: &ContainerLocation,
        payload: &[u8],
    ) -> Result<AppendOutcome, ArchiveError> {
        let container = &location.container;
        let now = self.clock.now();

        if !self.store.exists(container)? {
            let entry = location.entry_name(&now);
            let mut entries = EntrySet::new();
            entries.insert(entry.clone(), payload.to_vec());
            self.store.replace(container, &entries)?;

            info!(container = %container.display(), entry = %entry, "created snapshot container");
            return Ok(AppendOutcome {
                container: container.clone(),
                entry,
                created: true,
                evicted: Vec::new(),
            });
        }

        let mut loaded = self.store.load(container)?;
        let existing: BTreeSet<String> = loaded.keys().cloned().collect();

        let candidate = location.next_entry_name(
            &now,
            existing.iter().map(String::as_str),
            self.config.collision,
        )?;

        let plan = plan_rotation(
            existing.iter().map(String::as_str),
            &candidate,
            self.config.max_entries,
        );
        self.invariants.evaluate(&RotationContext {
            existing: &existing,
            candidate: &candidate,
            plan: &plan,
            max_entries: self.config.max_entries,
        })?;

        let mut survivors = EntrySet::new();
        for name in &plan.kept {
            if *name == candidate {
                survivors.insert(name.clone(), payload.to_vec());
            } else if let Some(bytes) = loaded.remove(name) {
                survivors.insert(name.clone(), bytes);
            }
        }

        for name in &plan.evicted {
            debug!(container = %container.display(), entry = %name, "evicting snapshot");
        }

        self.store.replace(container, &survivors)?;

        debug!(
            container = %container.display(),
            entry = %candidate,
            entries = survivors.len(),
            evicted = plan.evicted.len(),
            "appended snapshot"
        );

        Ok(AppendOutcome {
            container: container.clone(),
            entry: candidate,
            created: false,
            evicted: plan.evicted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CollisionPolicy;
    use crate::invariants::{Invariant, InvariantResult};
    use chrono::Duration;
    use std::fs;
    use tempfile::TempDir;

    fn disk_archive(clock: ManualClock) -> SnapshotArchive<ZipContainerStore, ManualClock> {
        SnapshotArchive::with_parts(ZipContainerStore::new(), clock, ArchiveConfig::default())
            .unwrap()
    }

    fn memory_archive(
        clock: ManualClock,
        config: ArchiveConfig,
    ) -> SnapshotArchive<InMemoryContainerStore, ManualClock> {
        SnapshotArchive::with_parts(InMemoryContainerStore::new(), clock, config).unwrap()
    }

    fn tick(archive: &SnapshotArchive<impl ContainerStore, ManualClock>) {
        archive.clock.advance(Duration::seconds(1));
    }

    #[test]
    fn first_append_creates_container() {
        let dir = TempDir::new().unwrap();
        let document = dir.path().join("test.excalidraw");
        let archive = disk_archive(ManualClock::at(2024, 6, 1, 12, 0, 0));

        let outcome = archive.append(&document, br#"{"test": "data"}"#).unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.container, dir.path().join("test.bak.zip"));
        assert!(outcome.container.exists());
        assert!(!document.exists());

        let entries = archive.store().load(&outcome.container).unwrap();
        assert_eq!(entries.len(), 1);
        let (name, bytes) = entries.iter().next().unwrap();
        assert_eq!(name, "test.2024-06-01_12-00-00.excalidraw.bak");
        assert!(name.starts_with("test.") && name.ends_with(".bak"));
        assert_eq!(bytes.as_slice(), br#"{"test": "data"}"#);
    }

    #[test]
    fn capacity_is_enforced_on_disk() {
        let dir = TempDir::new().unwrap();
        let document = dir.path().join("test.excalidraw");
        let archive = disk_archive(ManualClock::at(2024, 6, 1, 12, 0, 0));

        for i in 0..15 {
            archive
                .append(&document, format!("{{\"rev\": {i}}}").as_bytes())
                .unwrap();
            tick(&archive);
        }

        assert_eq!(archive.entries(&document).unwrap().len(), 10);
    }

    #[test]
    fn oldest_entries_are_evicted_and_survivors_untouched() {
        let document = Path::new("/scenes/drawing.excalidraw");
        let archive = memory_archive(
            ManualClock::at(2024, 6, 1, 12, 0, 0),
            ArchiveConfig::default(),
        );

        let mut written = Vec::new();
        for i in 0..13 {
            let payload = format!("v{i}").into_bytes();
            let outcome = archive.append(document, &payload).unwrap();
            written.push((outcome.entry, payload));
            tick(&archive);
        }

        let container = archive.location(document).unwrap().container;
        let entries = archive.store().load(&container).unwrap();
        assert_eq!(entries.len(), 10);

        for (name, _) in &written[..3] {
            assert!(!entries.contains_key(name), "{name} should be evicted");
        }
        for (name, payload) in &written[3..] {
            assert_eq!(entries.get(name), Some(payload));
        }
    }

    #[test]
    fn eviction_is_reported() {
        let document = Path::new("/scenes/drawing.excalidraw");
        let config = ArchiveConfig {
            max_entries: 2,
            ..ArchiveConfig::default()
        };
        let archive = memory_archive(ManualClock::at(2024, 6, 1, 12, 0, 0), config);

        let first = archive.append(document, b"a").unwrap();
        tick(&archive);
        archive.append(document, b"b").unwrap();
        tick(&archive);
        let third = archive.append(document, b"c").unwrap();

        assert_eq!(third.evicted, vec![first.entry]);
        assert_eq!(archive.entries(document).unwrap().len(), 2);
    }

    #[test]
    fn latest_is_always_present() {
        let document = Path::new("/scenes/drawing.excalidraw");
        let archive = memory_archive(
            ManualClock::at(2024, 6, 1, 12, 0, 0),
            ArchiveConfig::default(),
        );

        for i in 0..25 {
            let outcome = archive.append(document, &[i]).unwrap();
            let names = archive.entries(document).unwrap();
            assert_eq!(names.last(), Some(&outcome.entry));
            tick(&archive);
        }
    }

    #[test]
    fn documents_are_isolated() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("test1.excalidraw");
        let second = dir.path().join("test2.excalidraw");
        let archive = disk_archive(ManualClock::at(2024, 6, 1, 12, 0, 0));

        archive.append(&first, br#"{"file": "test1"}"#).unwrap();
        archive.append(&second, br#"{"file": "test2"}"#).unwrap();

        let one = archive.store().load(&dir.path().join("test1.bak.zip")).unwrap();
        let two = archive.store().load(&dir.path().join("test2.bak.zip")).unwrap();

        assert_eq!(one.len(), 1);
        assert_eq!(two.len(), 1);
        assert!(one.keys().all(|n| n.starts_with("test1.")));
        assert!(two.values().all(|b| b.as_slice() == br#"{"file": "test2"}"#));
    }

    #[test]
    fn empty_payload_is_accepted() {
        let document = Path::new("/scenes/empty.excalidraw");
        let archive = memory_archive(
            ManualClock::at(2024, 6, 1, 12, 0, 0),
            ArchiveConfig::default(),
        );

        let outcome = archive.append(document, b"").unwrap();
        let entries = archive.store().load(&outcome.container).unwrap();
        assert_eq!(entries.get(&outcome.entry), Some(&Vec::new()));
    }

    #[test]
    fn same_second_appends_are_disambiguated() {
        let document = Path::new("/scenes/drawing.excalidraw");
        let archive = memory_archive(
            ManualClock::at(2024, 6, 1, 12, 0, 0),
            ArchiveConfig::default(),
        );

        let a = archive.append(document, b"a").unwrap();
        let b = archive.append(document, b"b").unwrap();

        assert_eq!(a.entry, "drawing.2024-06-01_12-00-00.excalidraw.bak");
        assert_eq!(b.entry, "drawing.2024-06-01_12-00-00_01.excalidraw.bak");
        assert_eq!(archive.entries(document).unwrap(), vec![a.entry, b.entry]);
    }

    #[test]
    fn same_second_appends_replace_when_configured() {
        let document = Path::new("/scenes/drawing.excalidraw");
        let config = ArchiveConfig {
            collision: CollisionPolicy::Replace,
            ..ArchiveConfig::default()
        };
        let archive = memory_archive(ManualClock::at(2024, 6, 1, 12, 0, 0), config);

        archive.append(document, b"a").unwrap();
        let b = archive.append(document, b"b").unwrap();

        let entries = archive.store().load(&b.container).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries.get(&b.entry), Some(&b"b".to_vec()));
    }

    #[test]
    fn concurrent_appends_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let document = dir.path().join("drawing.excalidraw");
        let archive = disk_archive(ManualClock::at(2024, 6, 1, 12, 0, 0));

        std::thread::scope(|scope| {
            for i in 0..8u8 {
                let archive = &archive;
                let document = &document;
                scope.spawn(move || archive.append(document, &[i]).unwrap());
            }
        });

        let entries = archive.store().load(&dir.path().join("drawing.bak.zip")).unwrap();
        assert_eq!(entries.len(), 8);
        let mut payloads: Vec<u8> = entries.values().map(|b| b[0]).collect();
        payloads.sort();
        assert_eq!(payloads, (0..8).collect::<Vec<u8>>());
    }

    #[test]
    fn corrupt_container_fails_and_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let document = dir.path().join("drawing.excalidraw");
        let container = dir.path().join("drawing.bak.zip");
        let garbage = b"definitely not a zip file, just text padding it out".to_vec();
        fs::write(&container, &garbage).unwrap();

        let archive = disk_archive(ManualClock::at(2024, 6, 1, 12, 0, 0));
        let err = archive.append(&document, b"{}").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(fs::read(&container).unwrap(), garbage);
    }

    #[test]
    fn missing_parent_directory_is_an_access_error() {
        let dir = TempDir::new().unwrap();
        let document = dir.path().join("nowhere").join("drawing.excalidraw");
        let archive = disk_archive(ManualClock::at(2024, 6, 1, 12, 0, 0));

        let err = archive.append(&document, b"{}").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Access);
    }

    #[test]
    fn backwards_clock_still_appends_newest() {
        let document = Path::new("/scenes/drawing.excalidraw");
        let config = ArchiveConfig {
            max_entries: 2,
            ..ArchiveConfig::default()
        };
        let archive = memory_archive(ManualClock::at(2024, 6, 1, 12, 0, 0), config);

        let first = archive.append(document, b"a").unwrap();
        tick(&archive);
        let second = archive.append(document, b"b").unwrap();

        archive.clock.advance(Duration::hours(-1));
        let stale = archive.append(document, b"stale").unwrap();

        assert_eq!(stale.entry, "drawing.2024-06-01_12-00-01_01.excalidraw.bak");
        assert_eq!(stale.evicted, vec![first.entry]);
        assert_eq!(archive.entries(document).unwrap(), vec![second.entry, stale.entry]);
    }

    #[test]
    fn more_than_capacity_within_one_second() {
        let document = Path::new("/scenes/drawing.excalidraw");
        let archive = memory_archive(
            ManualClock::at(2024, 6, 1, 12, 0, 0),
            ArchiveConfig::default(),
        );

        let mut outcomes = Vec::new();
        for i in 0..13u8 {
            let outcome = archive.append(document, &[i]).unwrap();
            assert_eq!(
                archive.entries(document).unwrap().last(),
                Some(&outcome.entry)
            );
            outcomes.push(outcome);
        }

        let names = archive.entries(document).unwrap();
        assert_eq!(names.len(), 10);
        assert_eq!(names[0], "drawing.2024-06-01_12-00-00_03.excalidraw.bak");
        assert_eq!(names[9], "drawing.2024-06-01_12-00-00_12.excalidraw.bak");

        let entries = archive.store().load(&outcomes[12].container).unwrap();
        for (i, outcome) in outcomes.iter().enumerate().skip(3) {
            assert_eq!(entries.get(&outcome.entry), Some(&vec![i as u8]));
        }
    }

    #[test]
    fn clock_repeating_an_hour_keeps_name_order() {
        let document = Path::new("/scenes/drawing.excalidraw");
        let archive = memory_archive(
            ManualClock::at(2024, 11, 3, 1, 30, 0),
            ArchiveConfig::default(),
        );

        let mut appended = Vec::new();
        for step in 0..60 {
            if step == 30 {
                // 02:00 daylight time falls back to 01:00 standard time.
                archive.clock.advance(Duration::minutes(-60));
            }
            let outcome = archive.append(document, &[step]).unwrap();
            appended.push(outcome.entry);
            archive.clock.advance(Duration::minutes(1));
        }

        let mut sorted = appended.clone();
        sorted.sort();
        assert_eq!(appended, sorted);
        assert_eq!(archive.entries(document).unwrap(), appended[50..].to_vec());
    }

    #[test]
    fn foreign_names_sorting_last_block_append_and_keep_bytes() {
        let dir = TempDir::new().unwrap();
        let document = dir.path().join("drawing.excalidraw");
        let container = dir.path().join("drawing.bak.zip");

        let mut foreign = EntrySet::new();
        foreign.insert("zz-notes-1.txt".into(), b"one".to_vec());
        foreign.insert("zz-notes-2.txt".into(), b"two".to_vec());
        ZipContainerStore::new().replace(&container, &foreign).unwrap();
        let before = fs::read(&container).unwrap();

        let config = ArchiveConfig {
            max_entries: 2,
            ..ArchiveConfig::default()
        };
        let archive = SnapshotArchive::with_parts(
            ZipContainerStore::new(),
            ManualClock::at(2024, 6, 1, 12, 0, 0),
            config,
        )
        .unwrap();
        let err = archive.append(&document, b"{}").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Invariant);
        assert_eq!(fs::read(&container).unwrap(), before);
    }

    #[test]
    fn damaged_entry_is_a_read_error_and_container_is_kept() {
        let dir = TempDir::new().unwrap();
        let document = dir.path().join("drawing.excalidraw");
        let container = dir.path().join("drawing.bak.zip");

        let mut entries = EntrySet::new();
        entries.insert(
            "drawing.2024-06-01_11-00-00.excalidraw.bak".into(),
            b"SCENE-PAYLOAD-SCENE-PAYLOAD".to_vec(),
        );
        ZipContainerStore::with_compression(zip::CompressionMethod::Stored)
            .replace(&container, &entries)
            .unwrap();

        let mut bytes = fs::read(&container).unwrap();
        let at = bytes
            .windows(13)
            .position(|w| w == b"SCENE-PAYLOAD")
            .unwrap();
        bytes[at] ^= 0xff;
        fs::write(&container, &bytes).unwrap();

        let archive = disk_archive(ManualClock::at(2024, 6, 1, 12, 0, 0));
        let err = archive.append(&document, b"{}").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Read);
        assert_eq!(fs::read(&container).unwrap(), bytes);
    }

    #[test]
    fn custom_invariant_blocks_rewrite() {
        struct Frozen;

        impl Invariant for Frozen {
            fn name(&self) -> &'static str {
                "frozen"
            }

            fn validate(&self, _ctx: &RotationContext<'_>) -> InvariantResult {
                InvariantResult::Fail("archive is frozen".into())
            }
        }

        let document = Path::new("/scenes/drawing.excalidraw");
        let mut engine = InvariantEngine::new();
        engine.register(Frozen);
        let archive = memory_archive(
            ManualClock::at(2024, 6, 1, 12, 0, 0),
            ArchiveConfig::default(),
        )
        .with_invariants(engine);

        archive.append(document, b"a").unwrap();
        tick(&archive);
        let err = archive.append(document, b"b").unwrap_err();

        assert!(err.to_string().contains("frozen"));
        assert_eq!(archive.entries(document).unwrap().len(), 1);
    }

    #[test]
    fn entries_of_untracked_document_is_empty() {
        let archive = memory_archive(
            ManualClock::at(2024, 6, 1, 12, 0, 0),
            ArchiveConfig::default(),
        );
        assert!(archive
            .entries(Path::new("/scenes/never.excalidraw"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn zero_capacity_config_is_refused() {
        let config = ArchiveConfig {
            max_entries: 0,
            ..ArchiveConfig::default()
        };
        assert!(SnapshotArchive::new(config).is_err());
    }
}
