//! Persistence of areas, their entities and their candidates.
//!
//! [`JsonAreaStore`] keeps one JSON document per record under a data
//! directory:
//!
//! ```text
//! <dir>/areas/<osm_type>_<osm_id>.json
//! <dir>/entities/<place_id>.json
//! <dir>/candidates/<place_id>.json
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use wikimatch_match_models::{Candidate, Entity};
use wikimatch_place_models::{Area, AreaId};

/// Errors from reading or writing stored records.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A stored document could not be encoded or decoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Candidates of an area keyed by entity id.
pub type CandidateMap = BTreeMap<String, Vec<Candidate>>;

/// Where the pipeline keeps its state between stages.
#[async_trait]
pub trait AreaStore: Send + Sync {
    /// # Errors
    ///
    /// Returns [`StoreError`] if the record exists but cannot be read.
    async fn get_area(&self, id: AreaId) -> Result<Option<Area>, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be written.
    async fn save_area(&self, area: &Area) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the record exists but cannot be read.
    async fn load_entities(&self, place_id: i64) -> Result<Vec<Entity>, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be written.
    async fn save_entities(&self, place_id: i64, entities: &[Entity]) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the record exists but cannot be read.
    async fn load_candidates(&self, place_id: i64) -> Result<CandidateMap, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be written.
    async fn save_candidates(&self, place_id: i64, candidates: &CandidateMap) -> Result<(), StoreError>;

    /// Drops every stored candidate of an area.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the record exists but cannot be removed.
    async fn clear_candidates(&self, place_id: i64) -> Result<(), StoreError>;
}

/// [`AreaStore`] backed by JSON files.
#[derive(Debug, Clone)]
pub struct JsonAreaStore {
    dir: PathBuf,
}

impl JsonAreaStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn area_path(&self, id: AreaId) -> PathBuf {
        self.dir
            .join("areas")
            .join(format!("{}_{}.json", id.osm_type, id.osm_id))
    }

    fn entities_path(&self, place_id: i64) -> PathBuf {
        self.dir.join("entities").join(format!("{place_id}.json"))
    }

    fn candidates_path(&self, place_id: i64) -> PathBuf {
        self.dir.join("candidates").join(format!("{place_id}.json"))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl AreaStore for JsonAreaStore {
    async fn get_area(&self, id: AreaId) -> Result<Option<Area>, StoreError> {
        read_json(&self.area_path(id))
    }

    async fn save_area(&self, area: &Area) -> Result<(), StoreError> {
        log::debug!("save area {} state {}", area.id(), area.state);
        write_json(&self.area_path(area.id()), area)
    }

    async fn load_entities(&self, place_id: i64) -> Result<Vec<Entity>, StoreError> {
        Ok(read_json(&self.entities_path(place_id))?.unwrap_or_default())
    }

    async fn save_entities(&self, place_id: i64, entities: &[Entity]) -> Result<(), StoreError> {
        write_json(&self.entities_path(place_id), entities)
    }

    async fn load_candidates(&self, place_id: i64) -> Result<CandidateMap, StoreError> {
        Ok(read_json(&self.candidates_path(place_id))?.unwrap_or_default())
    }

    async fn save_candidates(&self, place_id: i64, candidates: &CandidateMap) -> Result<(), StoreError> {
        write_json(&self.candidates_path(place_id), candidates)
    }

    async fn clear_candidates(&self, place_id: i64) -> Result<(), StoreError> {
        match std::fs::remove_file(self.candidates_path(place_id)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
