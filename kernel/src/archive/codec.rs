// Zip Container Codec
//
// Persists a container as a standard zip file so any archive tool can
// open it. Writes go to a sibling temp file that is synced and then
// renamed over the container; readers never observe a partial file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::store::{ContainerStore, EntrySet};
use super::ArchiveError;

/// Temp files older than this are assumed to belong to a crashed writer.
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(10 * 60);

/// Zip-backed container store.
#[derive(Debug, Clone, Copy)]
pub struct ZipContainerStore {
    compression: CompressionMethod,
}

impl Default for ZipContainerStore {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Deflated,
        }
    }
}

impl ZipContainerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(compression: CompressionMethod) -> Self {
        Self { compression }
    }

    fn open(&self, container: &Path) -> Result<ZipArchive<BufReader<File>>, ArchiveError> {
        let file = File::open(container).map_err(|source| ArchiveError::Access {
            path: container.to_path_buf(),
            source,
        })?;

        ZipArchive::new(BufReader::new(file)).map_err(|err| match err {
            ZipError::Io(source) => ArchiveError::Access {
                path: container.to_path_buf(),
                source,
            },
            other => ArchiveError::Format {
                path: container.to_path_buf(),
                source: other,
            },
        })
    }

    fn write_entries(&self, temp: &Path, entries: &EntrySet) -> Result<(), ArchiveError> {
        let write_err = |source: std::io::Error| ArchiveError::Write {
            path: temp.to_path_buf(),
            source,
        };

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp)
            .map_err(|source| ArchiveError::Access {
                path: temp.to_path_buf(),
                source,
            })?;

        let mut writer = ZipWriter::new(BufWriter::new(file));
        let options = FileOptions::default().compression_method(self.compression);

        for (name, bytes) in entries {
            writer
                .start_file(name.as_str(), options)
                .map_err(|e| write_err(e.into()))?;
            writer.write_all(bytes).map_err(write_err)?;
        }

        let buffered = writer.finish().map_err(|e| write_err(e.into()))?;
        let file = buffered
            .into_inner()
            .map_err(|e| write_err(e.into_error()))?;
        file.sync_all().map_err(write_err)?;

        Ok(())
    }
}

/// `<container>.<uuid>.tmp` in the container's directory.
fn temp_path(container: &Path) -> PathBuf {
    let mut name = container.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    container.with_file_name(name)
}

/// Remove `<container>.<uuid>.tmp` files left behind by writers that
/// died before renaming. Recent temp files are left alone.
fn sweep_stale_temps(container: &Path, max_age: Duration) {
    let Some(name) = container.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let dir = match container.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let Ok(listing) = fs::read_dir(dir) else {
        return;
    };

    let prefix = format!("{name}.");
    for entry in listing.flatten() {
        let file_name = entry.file_name();
        let Some(id) = file_name
            .to_str()
            .and_then(|f| f.strip_prefix(prefix.as_str()))
            .and_then(|f| f.strip_suffix(".tmp"))
        else {
            continue;
        };
        if Uuid::try_parse(id).is_err() {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok());
        if !age.is_some_and(|age| age >= max_age) {
            continue;
        }

        let path = entry.path();
        warn!(temp = %path.display(), "removing stale temp file");
        let _ = fs::remove_file(&path);
    }
}

impl ContainerStore for ZipContainerStore {
    fn exists(&self, container: &Path) -> Result<bool, ArchiveError> {
        container
            .try_exists()
            .map_err(|source| ArchiveError::Access {
                path: container.to_path_buf(),
                source,
            })
    }

    fn list(&self, container: &Path) -> Result<Vec<String>, ArchiveError> {
        let archive = self.open(container)?;
        let mut names: Vec<String> = archive
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    fn load(&self, container: &Path) -> Result<EntrySet, ArchiveError> {
        let mut archive = self.open(container)?;
        let mut entries = EntrySet::new();

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).map_err(|e| ArchiveError::Read {
                path: container.to_path_buf(),
                entry: format!("#{index}"),
                source: e.into(),
            })?;
            if entry.is_dir() {
                continue;
            }

            let name = entry.name().to_string();
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|source| ArchiveError::Read {
                    path: container.to_path_buf(),
                    entry: name.clone(),
                    source,
                })?;

            // Later duplicates win.
            entries.insert(name, bytes);
        }

        Ok(entries)
    }

    fn replace(&self, container: &Path, entries: &EntrySet) -> Result<(), ArchiveError> {
        sweep_stale_temps(container, STALE_TEMP_AGE);
        let temp = temp_path(container);

        if let Err(err) = self.write_entries(&temp, entries) {
            warn!(temp = %temp.display(), error = %err, "container write failed, removing temp file");
            let _ = fs::remove_file(&temp);
            return Err(err);
        }

        if let Err(source) = fs::rename(&temp, container) {
            warn!(temp = %temp.display(), error = %source, "rename failed, removing temp file");
            let _ = fs::remove_file(&temp);
            return Err(ArchiveError::Write {
                path: container.to_path_buf(),
                source,
            });
        }

        debug!(container = %container.display(), entries = entries.len(), "container replaced");
        Ok(())
    }
}
