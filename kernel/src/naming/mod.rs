// Container Location & Entry Naming
//
// Derives where a document's snapshot container lives and how each
// snapshot inside it is named. Entry names sort lexicographically in
// chronological order; rotation depends on that, so a new name is
// always placed after the newest name already in the container.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local, NaiveDateTime};

use crate::config::{ArchiveConfig, CollisionPolicy};

/// Timestamp embedded in every entry name (local time, second resolution).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Length of a formatted timestamp, e.g. `2024-01-05_07-08-09`.
const TIMESTAMP_LEN: usize = 19;

/// Suffix terminating every entry name.
pub const ENTRY_SUFFIX: &str = ".bak";

/// Highest `_NN` sequence used within one timestamp before moving on
/// to the next second.
pub const MAX_SEQUENCE: u32 = 99;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("document path has no file name: {0}")]
    NoFileName(PathBuf),

    #[error("document file name is not valid UTF-8: {0}")]
    NonUtf8(PathBuf),

    #[error("no entry name available after `{0}`")]
    Exhausted(String),
}

/// Position of an entry on a document's timeline.
///
/// Ordering matches the lexicographic order of the names it produces:
/// timestamp first, then the `_NN` sequence (0 for the plain name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Slot {
    pub timestamp: String,
    pub seq: u32,
}

impl Slot {
    fn at(at: &DateTime<Local>) -> Self {
        Self {
            timestamp: format_timestamp(at),
            seq: 0,
        }
    }

    /// The slot immediately after this one.
    fn successor(&self) -> Result<Self, NamingError> {
        if self.seq < MAX_SEQUENCE {
            return Ok(Self {
                timestamp: self.timestamp.clone(),
                seq: self.seq + 1,
            });
        }

        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT)
            .ok()
            .and_then(|t| t.checked_add_signed(Duration::seconds(1)))
            .map(|t| Self {
                timestamp: t.format(TIMESTAMP_FORMAT).to_string(),
                seq: 0,
            })
            .ok_or_else(|| NamingError::Exhausted(self.timestamp.clone()))
    }
}

/// Where a document's snapshots are kept and how they are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLocation {
    pub container: PathBuf,
    pub stem: String,
    pub extension: Option<String>,
}

impl ContainerLocation {
    /// `<dir>/<stem><suffix>` for the given document path.
    ///
    /// The document need not exist.
    pub fn for_document(document: &Path, config: &ArchiveConfig) -> Result<Self, NamingError> {
        let file_name = document
            .file_name()
            .ok_or_else(|| NamingError::NoFileName(document.to_path_buf()))?;
        let file_name = file_name
            .to_str()
            .ok_or_else(|| NamingError::NonUtf8(document.to_path_buf()))?;

        let file_path = Path::new(file_name);
        let stem = file_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name)
            .to_string();
        let extension = file_path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string);

        let dir = document.parent().unwrap_or_else(|| Path::new(""));
        let container = dir.join(format!("{stem}{}", config.container_suffix));

        Ok(Self {
            container,
            stem,
            extension,
        })
    }

    /// Plain entry name for a snapshot taken at `at`.
    pub fn entry_name(&self, at: &DateTime<Local>) -> String {
        self.name_for(&Slot::at(at))
    }

    pub fn name_for(&self, slot: &Slot) -> String {
        let timestamp = match slot.seq {
            0 => slot.timestamp.clone(),
            n => format!("{}_{n:02}", slot.timestamp),
        };
        entry_name(&self.stem, &timestamp, self.extension.as_deref())
    }

    /// Parse one of this document's entry names back into its slot.
    ///
    /// Names belonging to other stems, or not following the layout,
    /// yield `None`.
    pub fn slot_of(&self, name: &str) -> Option<Slot> {
        let rest = name.strip_prefix(self.stem.as_str())?.strip_prefix('.')?;
        let timestamp = rest.get(..TIMESTAMP_LEN)?;
        NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;

        let tail = &rest[TIMESTAMP_LEN..];
        let seq = if tail.starts_with('.') {
            0
        } else {
            let digits = tail.strip_prefix('_')?.get(..2)?;
            if !digits.bytes().all(|b| b.is_ascii_digit()) || !tail[3..].starts_with('.') {
                return None;
            }
            digits.parse().ok()?
        };

        Some(Slot {
            timestamp: timestamp.to_string(),
            seq,
        })
    }

    /// Name for a snapshot taken at `at` that sorts after every entry of
    /// this document in `existing`.
    ///
    /// The plain timestamp is used when it is newer than everything
    /// present. Otherwise (same second, or the clock has gone backwards)
    /// the name takes the slot right after the newest one. Under
    /// [`CollisionPolicy::Replace`] a same-second snapshot reuses the
    /// newest slot instead.
    pub fn next_entry_name<'a, I>(
        &self,
        at: &DateTime<Local>,
        existing: I,
        collision: CollisionPolicy,
    ) -> Result<String, NamingError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let desired = Slot::at(at);
        let newest = existing.into_iter().filter_map(|n| self.slot_of(n)).max();

        let slot = match newest {
            None => desired,
            Some(newest) if desired.timestamp > newest.timestamp => desired,
            Some(newest)
                if collision == CollisionPolicy::Replace
                    && desired.timestamp == newest.timestamp =>
            {
                newest
            }
            Some(newest) => newest.successor()?,
        };

        Ok(self.name_for(&slot))
    }
}

pub fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// `<stem>.<timestamp>.<extension>.bak`, or `<stem>.<timestamp>.bak`
/// when the document has no extension.
pub fn entry_name(stem: &str, timestamp: &str, extension: Option<&str>) -> String {
    match extension {
        Some(ext) => format!("{stem}.{timestamp}.{ext}{ENTRY_SUFFIX}"),
        None => format!("{stem}.{timestamp}{ENTRY_SUFFIX}"),
    }
}
