use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};

pub(crate) const METADATA_FILE: &str = "statistics.meta";
const FORMAT_VERSION: u32 = 1;

/// Upper bound for the metadata payload; a corrupt length prefix must not
/// trigger a huge allocation.
const METADATA_LIMIT_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Metadata {
    pub format_version: u32,
    pub chunks: u32,
    pub rows_per_file: u64,
    pub chunk_sizes: Vec<u64>,
    pub owner_load: Vec<u64>,
    pub overflow_free_space: Vec<u64>,
}

impl Metadata {
    pub fn new(chunks: u32, rows_per_file: u64) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            chunks,
            rows_per_file,
            chunk_sizes: vec![0; chunks as usize],
            owner_load: vec![0; chunks as usize],
            overflow_free_space: Vec::new(),
        }
    }

    /// Reads the metadata in `dir`, or returns fresh metadata if there is none.
    pub fn load_or_new(dir: &Path, chunks: u32, rows_per_file: u64) -> Result<Self> {
        let path = dir.join(METADATA_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::new(chunks, rows_per_file))
            }
            Err(err) => return Err(err.into()),
        };
        let meta: Metadata = bincode_options()
            .with_limit(METADATA_LIMIT_BYTES)
            .deserialize(&bytes)?;

        if meta.format_version != FORMAT_VERSION {
            return Err(StatsError::Corrupted(format!(
                "unsupported metadata format version {}",
                meta.format_version
            )));
        }
        check("chunks", u64::from(meta.chunks), u64::from(chunks))?;
        check("rows_per_file", meta.rows_per_file, rows_per_file)?;
        if meta.chunk_sizes.len() != chunks as usize || meta.owner_load.len() != chunks as usize {
            return Err(StatsError::Corrupted(
                "counter arrays do not match the chunk count".to_owned(),
            ));
        }
        Ok(meta)
    }

    pub fn store(&self, dir: &Path) -> Result<()> {
        let bytes = bincode_options().serialize(self)?;
        atomic_write(&dir.join(METADATA_FILE), &bytes)
    }
}

fn check(field: &'static str, stored: u64, configured: u64) -> Result<()> {
    if stored != configured {
        return Err(StatsError::MetadataMismatch {
            field,
            stored,
            configured,
        });
    }
    Ok(())
}

fn bincode_options() -> impl bincode::Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Writes `bytes` to a temporary sibling and renames it over `path`.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Err(io::Error::other("path has no parent").into());
    };
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("statistics");
    let tmp_path = parent.join(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let written = (|| -> io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, path)
    })();
    if let Err(err) = written {
        if let Err(remove_err) = fs::remove_file(&tmp_path) {
            if remove_err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "graphstats.db",
                    path = %tmp_path.display(),
                    error = %remove_err,
                    "failed to remove temporary file after write failure"
                );
            }
        }
        return Err(err.into());
    }
    Ok(())
}

pub(crate) fn remove_metadata(dir: &Path) -> Result<()> {
    match fs::remove_file(dir.join(METADATA_FILE)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = Metadata::new(2, 100);
        meta.chunk_sizes = vec![3, 4];
        meta.owner_load = vec![1, 0];
        meta.overflow_free_space = vec![5, 2, 1];
        meta.store(dir.path()).unwrap();

        assert_eq!(Metadata::load_or_new(dir.path(), 2, 100).unwrap(), meta);
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from(METADATA_FILE)]);
    }

    #[test]
    fn missing_metadata_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let meta = Metadata::load_or_new(dir.path(), 3, 10).unwrap();
        assert_eq!(meta, Metadata::new(3, 10));
    }

    #[test]
    fn mismatched_layout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        Metadata::new(2, 100).store(dir.path()).unwrap();
        assert!(matches!(
            Metadata::load_or_new(dir.path(), 4, 100),
            Err(StatsError::MetadataMismatch {
                field: "chunks",
                stored: 2,
                configured: 4,
            })
        ));
    }

    #[test]
    fn garbage_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(METADATA_FILE), [0xff; 7]).unwrap();
        assert!(Metadata::load_or_new(dir.path(), 2, 100).is_err());
    }
}
