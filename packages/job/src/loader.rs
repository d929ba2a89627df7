//! Bulk loading of a merged map payload into a queryable store.

use std::path::Path;

use async_trait::async_trait;
use wikimatch_spatial::{FeatureStore, LoadError};

/// Turns a merged payload file into something the candidate filter can
/// search.
#[async_trait]
pub trait BulkLoader: Send + Sync {
    /// # Errors
    ///
    /// Returns [`LoadError::OutOfMemory`] when the payload is too big to
    /// load, or another [`LoadError`] on failure.
    async fn load(&self, path: &Path) -> Result<FeatureStore, LoadError>;
}

/// Loads payloads into an in-memory [`FeatureStore`], refusing files over
/// a size limit.
#[derive(Debug, Clone, Copy)]
pub struct MemoryLoader {
    pub max_bytes: u64,
}

impl MemoryLoader {
    #[must_use]
    pub const fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

#[async_trait]
impl BulkLoader for MemoryLoader {
    async fn load(&self, path: &Path) -> Result<FeatureStore, LoadError> {
        let path = path.to_path_buf();
        let max_bytes = self.max_bytes;
        tokio::task::spawn_blocking(move || FeatureStore::load_file(&path, max_bytes))
            .await
            .map_err(|e| LoadError::Io(std::io::Error::other(e)))?
    }
}
