//! On-disk cache of raw chunk payloads.
//!
//! One file per chunk, named by [`ChunkId::filename`]. Only the scheduler
//! worker writes here; writes go to a temporary file that is renamed into
//! place, so a reader never sees a partial payload.
//!
//! [`ChunkId::filename`]: wikimatch_place_models::ChunkId::filename

use std::path::{Path, PathBuf};

/// Directory of cached chunk payloads.
#[derive(Debug, Clone)]
pub struct ChunkCache {
    dir: PathBuf,
}

impl ChunkCache {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    #[must_use]
    pub fn contains(&self, filename: &str) -> bool {
        self.path(filename).is_file()
    }

    /// Writes a payload atomically.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from creating the directory, writing the
    /// temporary file or renaming it.
    pub fn write(&self, filename: &str, payload: &[u8]) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let tmp = self.path(&format!("{filename}.tmp"));
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, self.path(filename))
    }

    /// # Errors
    ///
    /// Returns any I/O error from reading the file.
    pub fn read(&self, filename: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path(filename))
    }

    /// Deletes every cached file of one area: `<place_id>.json` and
    /// `<place_id>_*`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than the directory not existing.
    pub fn remove_area(&self, place_id: i64) -> std::io::Result<usize> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let single = format!("{place_id}.json");
        let prefix = format!("{place_id}_");
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == single || name.starts_with(&prefix) {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        log::debug!("removed {removed} cached chunk files for place {place_id}");
        Ok(removed)
    }
}
