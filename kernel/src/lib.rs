// Drawbak Kernel
//
// Bounded snapshot archive for scene documents, plus the load/save
// contract that decides when snapshots are taken.

pub mod archive;
pub mod clock;
pub mod config;
pub mod document;
pub mod invariants;
pub mod lock;
pub mod naming;
pub mod rotation;

pub use archive::{AppendOutcome, ArchiveError, ErrorKind, SnapshotArchive};
pub use config::{ArchiveConfig, CollisionPolicy, MAX_ENTRIES};
pub use document::{BackupStatus, DocumentService, JsonValidator};
