// Document Load & Save
//
// The editor-facing half: read a scene, check it parses, snapshot the
// bytes that were just read, and write scenes back. A failed snapshot
// is reported but never fails the load.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::archive::{AppendOutcome, ContainerStore, SnapshotArchive, ZipContainerStore};
use crate::clock::{Clock, SystemClock};

/// Decides whether loaded bytes are an acceptable document.
pub trait DocumentValidator: Send + Sync {
    fn validate(&self, bytes: &[u8]) -> Result<(), String>;
}

/// Accepts any payload that parses as a JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonValidator;

impl DocumentValidator for JsonValidator {
    fn validate(&self, bytes: &[u8]) -> Result<(), String> {
        serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(bytes)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("{path} is not a valid document: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("failed to save {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Result of snapshotting a freshly loaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackupStatus {
    Saved(AppendOutcome),
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct OpenedDocument {
    pub path: PathBuf,
    pub contents: Vec<u8>,
    pub backup: BackupStatus,
}

pub struct DocumentService<V = JsonValidator, S = ZipContainerStore, C = SystemClock> {
    archive: SnapshotArchive<S, C>,
    validator: V,
}

impl<S: ContainerStore, C: Clock> DocumentService<JsonValidator, S, C> {
    pub fn new(archive: SnapshotArchive<S, C>) -> Self {
        Self::with_validator(archive, JsonValidator)
    }
}

impl<V: DocumentValidator, S: ContainerStore, C: Clock> DocumentService<V, S, C> {
    pub fn with_validator(archive: SnapshotArchive<S, C>, validator: V) -> Self {
        Self { archive, validator }
    }

    pub fn archive(&self) -> &SnapshotArchive<S, C> {
        &self.archive
    }

    /// Read and validate `path`, then snapshot what was read.
    pub fn open(&self, path: &Path) -> Result<OpenedDocument, DocumentError> {
        let contents = fs::read(path).map_err(|source| DocumentError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        self.validator
            .validate(&contents)
            .map_err(|reason| DocumentError::Invalid {
                path: path.to_path_buf(),
                reason,
            })?;

        let backup = match self.archive.append(path, &contents) {
            Ok(outcome) => BackupStatus::Saved(outcome),
            Err(err) => {
                warn!(document = %path.display(), error = %err, "backup failed");
                BackupStatus::Failed {
                    reason: err.to_string(),
                }
            }
        };

        Ok(OpenedDocument {
            path: path.to_path_buf(),
            contents,
            backup,
        })
    }

    /// Overwrite `path` with `contents`. No snapshot is taken.
    pub fn save(&self, path: &Path, contents: &[u8]) -> Result<(), DocumentError> {
        fs::write(path, contents).map_err(|source| DocumentError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
