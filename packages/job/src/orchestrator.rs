//! The per-area matching pipeline.
//!
//! Stages, each persisted on completion:
//!
//! 1. entity list from the knowledge base, chunked for large areas
//!    (`entity-list-loaded`)
//! 2. entity details, categories and extracts (`tags-enriched`)
//! 3. map data, one query per chunk through the [`FetchScheduler`]
//!    (`data-fetched`)
//! 4. merged payload loaded into a [`FeatureStore`] (`bulk-loaded`)
//! 5. candidate selection and reconciliation (`ready`)
//!
//! A stop request is honoured between stages and between entities.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use wikimatch_candidate::{CandidateFilter, Reconciled, reconcile, review_notes};
use wikimatch_job_models::{EventKind, Pin};
use wikimatch_match_models::{Entity, OsmType};
use wikimatch_overpass::oql::{drop_building_tag, oql_for_area, oql_for_point, query_tags};
use wikimatch_place_models::{Area, AreaId, AreaState, BoundingBox, Chunk, ChunkId};
use wikimatch_queue::{ChunkCache, FetchEvent, FetchScheduler, Notifier, STATUS_FAILURE_MSG};
use wikimatch_spatial::area::metres_to_degrees;
use wikimatch_spatial::chunk::{
    ENTITY_ISA_UNIT_SIZE, ENTITY_UNIT_SIZE, MAP_ISA_UNIT_SIZE, MAP_UNIT_SIZE,
};
use wikimatch_spatial::osm::payload_remark;
use wikimatch_spatial::{
    FeatureStore, area_chunks, entity_chunk_count, merge_payloads, subdivide, subdivide_chunk,
};
use wikimatch_wikidata::wikipedia::enrich;
use wikimatch_wikidata::{KnowledgeBase, QueryItem, entity_from_item, load_details};

use crate::JobError;
use crate::job::Job;
use crate::loader::BulkLoader;
use crate::store::{AreaStore, CandidateMap};

/// Search radius for node areas without one, in metres.
const DEFAULT_POINT_RADIUS: u32 = 1000;

/// Tunables for every job.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Accept bare address nodes as candidates.
    pub match_address_nodes: bool,
    /// Times a timed-out chunk may be split before giving up.
    pub max_subdivide_depth: usize,
    /// Directory for per-run event logs; `None` disables them.
    pub logs_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            match_address_nodes: false,
            max_subdivide_depth: 4,
            logs_dir: None,
        }
    }
}

/// Runs jobs against the shared collaborators.
pub struct Orchestrator {
    kb: Arc<dyn KnowledgeBase>,
    scheduler: FetchScheduler,
    cache: ChunkCache,
    store: Arc<dyn AreaStore>,
    loader: Arc<dyn BulkLoader>,
    notifier: Arc<dyn Notifier>,
    settings: Settings,
}

fn label_and_qid(entity: &Entity) -> String {
    format!(
        "{} ({})",
        entity.label.as_deref().unwrap_or(&entity.qid),
        entity.qid
    )
}

fn candidate_line(entity: &Entity, count: usize) -> String {
    let noun = if count == 1 { "candidate" } else { "candidates" };
    format!("{}: {count} {noun} found", label_and_qid(entity))
}

fn pins(entities: &[Entity]) -> Vec<Pin> {
    entities
        .iter()
        .filter_map(|e| {
            let c = e.coordinate?;
            Some(Pin {
                qid: e.qid.clone(),
                lat: c.lat,
                lon: c.lon,
                label: e.label.clone().unwrap_or_else(|| e.qid.clone()),
                tags: e.criteria.iter().map(ToString::to_string).collect(),
            })
        })
        .collect()
}

/// Box around a node area's point and radius.
fn point_bbox(area: &Area) -> BoundingBox {
    let Some(point) = area.point else {
        return area.bbox;
    };
    let radius = area.radius.unwrap_or(DEFAULT_POINT_RADIUS);
    let (dlat, dlon) = metres_to_degrees(f64::from(radius), point.lat);
    BoundingBox::new(
        point.lon - dlon,
        point.lat - dlat,
        point.lon + dlon,
        point.lat + dlat,
    )
}

/// Query tags of the entities inside `bbox`.
fn tags_within(entities: &[Entity], bbox: Option<&BoundingBox>, want_isa: bool) -> BTreeSet<String> {
    let tags = query_tags(
        entities
            .iter()
            .filter(|e| match (bbox, e.coordinate) {
                (None, _) => true,
                (Some(b), Some(c)) => b.contains(c),
                (Some(_), None) => false,
            })
            .flat_map(|e| e.criteria.iter()),
    );
    if want_isa { drop_building_tag(tags) } else { tags }
}

fn chunk_oql(area: AreaId, entities: &[Entity], bbox: &BoundingBox, want_isa: bool) -> Option<String> {
    let tags = tags_within(entities, Some(bbox), want_isa);
    if tags.is_empty() {
        return None;
    }
    oql_for_area(area, &tags, bbox, true)
}

/// Name of the merged payload for an area.
fn merged_filename(area: &Area) -> String {
    ChunkId::new(area.place_id, 0, 1).filename()
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        kb: Arc<dyn KnowledgeBase>,
        scheduler: FetchScheduler,
        cache: ChunkCache,
        store: Arc<dyn AreaStore>,
        loader: Arc<dyn BulkLoader>,
        notifier: Arc<dyn Notifier>,
        settings: Settings,
    ) -> Self {
        Self {
            kb,
            scheduler,
            cache,
            store,
            loader,
            notifier,
            settings,
        }
    }

    #[must_use]
    pub fn store(&self) -> &dyn AreaStore {
        self.store.as_ref()
    }

    /// Runs the pipeline and reports how it ended to the job's
    /// subscribers. Failures other than a stop request are also sent to
    /// the operator.
    pub async fn run_job(&self, job: &Job) {
        let hub = job.hub();
        match self.run(job).await {
            Ok(()) => {}
            Err(JobError::Stopped) => {
                log::info!("job {} stopped", job.area);
                hub.error(JobError::Stopped.to_string());
            }
            Err(e) => self.report_failure(job, &e.to_string()).await,
        }
    }

    /// Ends the job with an `error` event and tells the operator.
    pub async fn report_failure(&self, job: &Job, msg: &str) {
        log::error!("job {} failed: {msg}", job.area);
        job.hub().error(msg);
        self.notifier
            .notify("matcher job failed", &format!("{}: {msg}", job.area))
            .await;
    }

    async fn advance(&self, area: &mut Area, state: AreaState) -> Result<(), JobError> {
        log::info!("{}: {} -> {state}", area.id(), area.state);
        area.state = state;
        self.store.save_area(area).await?;
        Ok(())
    }

    async fn run(&self, job: &Job) -> Result<(), JobError> {
        let hub = job.hub();
        let Some(mut area) = self.store.get_area(job.area).await? else {
            hub.send(EventKind::NotFound);
            hub.send(EventKind::Done);
            return Ok(());
        };
        if area.state.is_terminal() {
            hub.send(EventKind::AlreadyDone);
            hub.send(EventKind::Done);
            return Ok(());
        }

        if let Some(dir) = &self.settings.logs_dir {
            let path = dir.join(format!("{}_{}.jsonl", area.place_id, job.start.timestamp()));
            if let Err(e) = hub.open_log(&path) {
                log::warn!("run log {}: {e}", path.display());
            }
        }

        if area.state == AreaState::Refresh {
            self.prepare_for_refresh(&mut area).await?;
        }

        let mut entities = if area.state.has_reached(AreaState::EntityListLoaded) {
            self.store.load_entities(area.place_id).await?
        } else {
            self.get_items(job, &mut area).await?
        };
        hub.status(format!("{} Wikidata items found", entities.len()));
        job.check_for_stop()?;

        if !area.state.has_reached(AreaState::TagsEnriched) {
            self.get_item_detail(job, &mut area, &mut entities).await?;
        }
        job.check_for_stop()?;

        if !area.state.has_reached(AreaState::DataFetched) {
            match self.fetch_map_data(job, &area, &entities).await {
                Ok(()) => self.advance(&mut area, AreaState::DataFetched).await?,
                Err(e) if e.is_fetch_failure() => {
                    let state = if matches!(e, JobError::FetchTimeout { .. }) {
                        AreaState::FetchTimeout
                    } else {
                        AreaState::FetchError
                    };
                    self.advance(&mut area, state).await?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
        job.check_for_stop()?;

        let features = self.bulk_load(job, &mut area).await?;
        job.check_for_stop()?;

        self.run_matcher(job, &area, &entities, &features).await?;
        job.check_for_stop()?;

        self.advance(&mut area, AreaState::Ready).await?;
        hub.send(EventKind::Done);
        Ok(())
    }

    async fn prepare_for_refresh(&self, area: &mut Area) -> Result<(), JobError> {
        let removed = self.cache.remove_area(area.place_id)?;
        log::info!("refresh {}: {removed} cached files removed", area.id());
        self.store.clear_candidates(area.place_id).await?;
        area.wikidata_query_timeout = false;
        self.advance(area, AreaState::New).await
    }

    async fn get_items(&self, job: &Job, area: &mut Area) -> Result<Vec<Entity>, JobError> {
        let hub = job.hub();
        hub.send(EventKind::GetWikidataItems);

        let items = if area.is_point() {
            self.kb.items_in_bbox(&point_bbox(area)).await?
        } else {
            self.get_items_bbox(job, area).await?
        };
        job.check_for_stop()?;

        hub.status("wikidata query complete");
        let entities: Vec<Entity> = items.into_iter().map(entity_from_item).collect();
        hub.send(EventKind::Pins { pins: pins(&entities) });
        job.check_for_stop()?;

        self.store.save_entities(area.place_id, &entities).await?;
        self.advance(area, AreaState::EntityListLoaded).await?;
        hub.send(EventKind::ItemsSaved);
        Ok(entities)
    }

    /// Entity list for a way or relation area. Small areas take one query;
    /// a timeout there, or a large area, switches to a grid whose cells
    /// are split into four whenever they time out.
    async fn get_items_bbox(&self, job: &Job, area: &mut Area) -> Result<Vec<QueryItem>, JobError> {
        let hub = job.hub();
        let unit = if job.request.want_isa.is_empty() {
            ENTITY_UNIT_SIZE
        } else {
            ENTITY_ISA_UNIT_SIZE
        };

        if entity_chunk_count(area, unit) == 1 {
            log::debug!("{}: wikidata unchunked", area.id());
            match self.kb.items_in_bbox(&area.bbox).await {
                Ok(items) => return Ok(items),
                Err(e) if e.is_timeout() => {
                    area.wikidata_query_timeout = true;
                    self.store.save_area(area).await?;
                    hub.status("wikidata query timeout, retrying with smaller chunks.");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut cells = area_chunks(area, unit);
        if let [only] = cells.as_slice() {
            cells = subdivide(only);
        }
        hub.status(format!("downloading wikidata in {} chunks", cells.len()));

        let mut pending: Vec<(BoundingBox, usize)> = cells.into_iter().map(|b| (b, 0)).collect();
        let mut items: BTreeMap<String, QueryItem> = BTreeMap::new();
        let mut num = 0;
        while let Some((bbox, depth)) = pending.pop() {
            job.check_for_stop()?;
            num += 1;
            hub.status(format!("requesting wikidata chunk {num}"));
            match self.kb.items_in_bbox(&bbox).await {
                Ok(found) => {
                    for item in found {
                        items.entry(item.qid.clone()).or_insert(item);
                    }
                }
                Err(e) if e.is_timeout() => {
                    if depth >= self.settings.max_subdivide_depth {
                        return Err(JobError::EntityListTimeout);
                    }
                    hub.status(format!("wikidata timeout, splitting chunk {num} into four"));
                    pending.extend(subdivide(&bbox).into_iter().map(|b| (b, depth + 1)));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(items.into_values().collect())
    }

    async fn get_item_detail(
        &self,
        job: &Job,
        area: &mut Area,
        entities: &mut Vec<Entity>,
    ) -> Result<(), JobError> {
        let hub = job.hub();
        hub.status("getting wikidata item details");
        load_details(self.kb.as_ref(), entities).await?;
        for entity in entities.iter() {
            hub.item_line(format!("load entity: {}", label_and_qid(entity)));
        }
        hub.item_line("wikidata entities loaded");

        let want_isa = &job.request.want_isa;
        if !want_isa.is_empty() {
            entities.retain(|e| want_isa.iter().any(|isa| e.is_instance_of(isa)));
            hub.status(format!("{} items of the wanted types", entities.len()));
        }
        job.check_for_stop()?;

        hub.send(EventKind::LoadCat);
        hub.status("loading wikipedia extracts");
        enrich(self.kb.as_ref(), entities).await?;
        hub.send(EventKind::LoadCatDone);
        hub.item_line("extracts loaded");

        self.store.save_entities(area.place_id, entities).await?;
        self.advance(area, AreaState::TagsEnriched).await
    }

    /// Fetch chunks for the area, each querying only the tags of the
    /// entities inside it.
    fn map_chunks(area: &Area, entities: &[Entity], want_isa: bool) -> Vec<Chunk> {
        if area.is_point() {
            let tags = tags_within(entities, None, want_isa);
            let center = area.point.unwrap_or_else(|| area.bbox.center());
            let radius = area.radius.unwrap_or(DEFAULT_POINT_RADIUS);
            return vec![Chunk {
                id: ChunkId::new(area.place_id, 0, 1),
                bbox: area.bbox,
                oql: (!tags.is_empty()).then(|| oql_for_point(center.lat, center.lon, radius, &tags)),
            }];
        }

        let unit = if want_isa { MAP_ISA_UNIT_SIZE } else { MAP_UNIT_SIZE };
        let cells = area_chunks(area, unit);
        let total = cells.len();
        cells
            .into_iter()
            .enumerate()
            .map(|(num, bbox)| Chunk {
                id: ChunkId::new(area.place_id, num, total),
                oql: chunk_oql(area.id(), entities, &bbox, want_isa),
                bbox,
            })
            .collect()
    }

    async fn fetch_map_data(&self, job: &Job, area: &Area, entities: &[Entity]) -> Result<(), JobError> {
        let hub = job.hub();
        let want_isa = !job.request.want_isa.is_empty();
        let chunks = Self::map_chunks(area, entities, want_isa);
        if area.osm_type != OsmType::Node {
            let empty: Vec<usize> = chunks
                .iter()
                .filter(|c| c.oql.is_none())
                .map(|c| c.id.num)
                .collect();
            if !empty.is_empty() {
                hub.send(EventKind::Empty { empty });
            }
        }
        job.check_for_stop()?;

        let fetched = self.overpass_request(job, area, entities, chunks).await?;
        job.check_for_stop()?;
        self.merge_chunks(job, area, &fetched).await
    }

    /// Submits chunks to the scheduler and relays its progress. Chunks
    /// that time out are split into quadrants and submitted again until
    /// the depth limit. Returns the chunks whose payloads are cached.
    async fn overpass_request(
        &self,
        job: &Job,
        area: &Area,
        entities: &[Entity],
        chunks: Vec<Chunk>,
    ) -> Result<Vec<Chunk>, JobError> {
        let hub = job.hub();
        let want_isa = !job.request.want_isa.is_empty();
        let mut fetched = Vec::new();
        let mut pending = chunks;

        while !pending.is_empty() {
            let by_label: BTreeMap<String, Chunk> = pending
                .iter()
                .map(|c| (c.id.to_string(), c.clone()))
                .collect();
            let mut rx = self.scheduler.submit(area.id(), area.area_sq_km, pending)?;
            let mut retry = Vec::new();
            let mut errors = Vec::new();
            let mut complete = false;

            while let Some(event) = rx.recv().await {
                match event {
                    FetchEvent::Empty { .. } => {}
                    FetchEvent::Status { wait } => hub.send(EventKind::Status { wait }),
                    FetchEvent::GetChunk { num, .. } => hub.send(EventKind::GetChunk { chunk_num: num }),
                    FetchEvent::ChunkDone { num, chunk, .. } => {
                        hub.send(EventKind::ChunkDone { chunk_num: num });
                        if let Some(c) = by_label.get(&chunk) {
                            fetched.push(c.clone());
                        }
                    }
                    FetchEvent::Timeout { chunk, .. } => {
                        let Some(c) = by_label.get(&chunk) else {
                            continue;
                        };
                        if c.id.depth() >= self.settings.max_subdivide_depth {
                            return Err(JobError::FetchTimeout { chunk });
                        }
                        hub.status(format!("overpass timeout, splitting chunk {chunk} into four"));
                        retry.extend(subdivide_chunk(&c.id, &c.bbox).into_iter().map(|(id, bbox)| Chunk {
                            oql: chunk_oql(area.id(), entities, &bbox, want_isa),
                            id,
                            bbox,
                        }));
                    }
                    FetchEvent::Error { msg } => {
                        hub.status(msg.clone());
                        errors.push(msg);
                    }
                    FetchEvent::Done => {
                        complete = true;
                        break;
                    }
                }
                job.check_for_stop()?;
            }

            if !errors.is_empty() {
                return Err(JobError::Fetch {
                    message: errors.join("; "),
                });
            }
            if !complete {
                return Err(JobError::Fetch {
                    message: STATUS_FAILURE_MSG.to_string(),
                });
            }
            pending = retry;
        }

        hub.send(EventKind::OverpassDone);
        Ok(fetched)
    }

    /// Combines the fetched chunk payloads into the area's merged payload,
    /// failing on any payload that carries a server error.
    async fn merge_chunks(&self, job: &Job, area: &Area, fetched: &[Chunk]) -> Result<(), JobError> {
        let merged = merged_filename(area);
        let mut payloads = Vec::with_capacity(fetched.len());
        for chunk in fetched {
            let payload: Value = serde_json::from_slice(&self.cache.read(&chunk.filename())?)?;
            if let Some(remark) = payload_remark(&payload)
                && remark.contains("runtime error")
            {
                self.notifier.notify("Overpass error", remark).await;
                return Err(JobError::Overpass {
                    message: remark.to_string(),
                });
            }
            payloads.push(payload);
        }

        if let [only] = fetched
            && only.filename() == merged
        {
            return Ok(());
        }
        let payload = merge_payloads(payloads);
        self.cache.write(&merged, &serde_json::to_vec(&payload)?)?;
        job.hub().status(format!("merged {} chunks", fetched.len()));
        Ok(())
    }

    async fn bulk_load(&self, job: &Job, area: &mut Area) -> Result<FeatureStore, JobError> {
        let hub = job.hub();
        hub.status("loading map data");
        let features = self.loader.load(&self.cache.path(&merged_filename(area))).await?;
        hub.status(format!("{} map features loaded", features.len()));
        if !area.state.has_reached(AreaState::BulkLoaded) {
            self.advance(area, AreaState::BulkLoaded).await?;
        }
        Ok(features)
    }

    async fn run_matcher(
        &self,
        job: &Job,
        area: &Area,
        entities: &[Entity],
        features: &FeatureStore,
    ) -> Result<(), JobError> {
        let hub = job.hub();
        hub.status("running matcher");
        let filter = CandidateFilter::new(self.settings.match_address_nodes, area.place_names.clone());
        let existing = self.store.load_candidates(area.place_id).await?;

        let mut results = CandidateMap::new();
        let mut removed = 0;
        for entity in entities {
            let nearby = CandidateFilter::nearby(entity, features);
            let found = filter.select_candidates(entity, &nearby);
            let previous = existing.get(&entity.qid).map_or(&[][..], Vec::as_slice);
            let Reconciled { upserts, removals } = reconcile(previous, &found);
            removed += removals.len();
            hub.item_line(candidate_line(entity, upserts.len()));
            for (osm_type, osm_id) in removals {
                hub.item_line(format!("{}: {osm_type}/{osm_id} no longer found", label_and_qid(entity)));
            }
            if !upserts.is_empty() {
                results.insert(entity.qid.clone(), upserts);
            }
            job.check_for_stop()?;
        }

        let notes = review_notes(&results);
        for ((qid, osm_type, osm_id), flags) in &notes {
            let reasons: Vec<&str> = flags.iter().map(|f| f.describe()).collect();
            hub.item_line(format!("{qid}: {osm_type}/{osm_id} needs review ({})", reasons.join(", ")));
        }
        log::info!(
            "{}: {} candidates for {} items, {removed} removed, {} need review",
            area.id(),
            results.values().map(Vec::len).sum::<usize>(),
            results.len(),
            notes.len()
        );
        self.store.save_candidates(area.place_id, &results).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;
    use wikimatch_job_models::{MatchRequest, ProgressEvent};
    use wikimatch_match_models::{Candidate, Coordinate, MatchEvidence, MatchKind, TagCriteria, TagMap};
    use wikimatch_overpass::{MapExtractService, OverpassError, Status};
    use wikimatch_queue::LogNotifier;
    use wikimatch_wikidata::WikidataError;

    use super::*;
    use crate::JobRegistry;
    use crate::loader::MemoryLoader;
    use crate::store::JsonAreaStore;

    #[derive(Default)]
    struct OnePub {
        timeouts: Mutex<usize>,
        bbox_queries: Mutex<usize>,
        panics: bool,
        /// When set, entity details wait for a permit.
        gate: Option<Arc<Notify>>,
    }

    impl OnePub {
        fn with_timeouts(timeouts: usize) -> Self {
            Self {
                timeouts: Mutex::new(timeouts),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl KnowledgeBase for OnePub {
        async fn items_in_bbox(&self, _bbox: &BoundingBox) -> Result<Vec<QueryItem>, WikidataError> {
            *self.bbox_queries.lock().unwrap() += 1;
            assert!(!self.panics, "query service returned garbage");
            {
                let mut timeouts = self.timeouts.lock().unwrap();
                if *timeouts > 0 {
                    *timeouts -= 1;
                    return Err(WikidataError::QueryTimeout {
                        message: "java.util.concurrent.TimeoutException".to_string(),
                    });
                }
            }
            let mut criteria = TagCriteria::default();
            criteria.insert("amenity=pub");
            Ok(vec![QueryItem {
                qid: "Q100".to_string(),
                label: "The Red Lion".to_string(),
                coordinate: Some(Coordinate::new(51.5, -0.1)),
                address: None,
                street: None,
                criteria,
            }])
        }

        async fn get_entity(&self, _qid: &str) -> Result<Option<Entity>, WikidataError> {
            Ok(None)
        }

        async fn get_entities(&self, qids: &[String]) -> Result<Vec<Value>, WikidataError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(qids
                .iter()
                .map(|q| json!({"id": q, "labels": {"en": {"language": "en", "value": "The Red Lion"}}}))
                .collect())
        }

        async fn get_last_revision(&self, _qid: &str) -> Result<u64, WikidataError> {
            Ok(1)
        }

        async fn get_last_revisions(&self, _qids: &[String]) -> Result<BTreeMap<String, u64>, WikidataError> {
            Ok(BTreeMap::new())
        }

        async fn get_categories(&self, _titles: &[String]) -> Result<BTreeMap<String, Vec<String>>, WikidataError> {
            Ok(BTreeMap::new())
        }

        async fn get_extracts(&self, _titles: &[String]) -> Result<BTreeMap<String, String>, WikidataError> {
            Ok(BTreeMap::new())
        }
    }

    struct Overpass {
        timeouts: Mutex<usize>,
        queries: Mutex<usize>,
    }

    #[async_trait]
    impl MapExtractService for Overpass {
        async fn get_status(&self) -> Result<Status, OverpassError> {
            Ok(Status {
                rate_limit: 2,
                ..Status::default()
            })
        }

        async fn run_query(&self, _oql: &str) -> Result<Vec<u8>, OverpassError> {
            *self.queries.lock().unwrap() += 1;
            {
                let mut timeouts = self.timeouts.lock().unwrap();
                if *timeouts > 0 {
                    *timeouts -= 1;
                    return Err(OverpassError::Timeout);
                }
            }
            Ok(serde_json::to_vec(&json!({
                "elements": [
                    {"type": "node", "id": 1, "lat": 51.5001, "lon": -0.1001,
                     "tags": {"name": "Red Lion", "amenity": "pub"}}
                ]
            }))
            .unwrap())
        }
    }

    struct Fixture {
        dir: PathBuf,
        registry: Arc<JobRegistry>,
        store: JsonAreaStore,
        cache: ChunkCache,
        overpass: Arc<Overpass>,
        kb: Arc<OnePub>,
    }

    fn setup(name: &str, kb_timeouts: usize, map_timeouts: usize, max_depth: usize) -> Fixture {
        setup_with(name, OnePub::with_timeouts(kb_timeouts), map_timeouts, max_depth)
    }

    fn setup_with(name: &str, kb: OnePub, map_timeouts: usize, max_depth: usize) -> Fixture {
        let kb = Arc::new(kb);
        let dir = std::env::temp_dir().join(format!("wikimatch_job_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let store = JsonAreaStore::new(dir.join("store"));
        let cache = ChunkCache::new(dir.join("overpass"));
        let overpass = Arc::new(Overpass {
            timeouts: Mutex::new(map_timeouts),
            queries: Mutex::new(0),
        });
        let (scheduler, _worker) =
            FetchScheduler::start(overpass.clone(), cache.clone(), Arc::new(LogNotifier));
        let orchestrator = Orchestrator::new(
            kb.clone(),
            scheduler,
            cache.clone(),
            Arc::new(store.clone()),
            Arc::new(MemoryLoader::new(1 << 20)),
            Arc::new(LogNotifier),
            Settings {
                max_subdivide_depth: max_depth,
                logs_dir: Some(dir.join("logs")),
                ..Settings::default()
            },
        );
        Fixture {
            registry: JobRegistry::new(Arc::new(orchestrator)),
            dir,
            store,
            cache,
            overpass,
            kb,
        }
    }

    fn area(state: AreaState) -> Area {
        Area {
            place_id: 77,
            osm_type: OsmType::Relation,
            osm_id: 62_149,
            display_name: "Camden".to_string(),
            bbox: BoundingBox::new(-0.2, 51.45, 0.0, 51.55),
            area_sq_km: 20.0,
            polygon_geojson: None,
            point: None,
            radius: None,
            state,
            wikidata_query_timeout: false,
            place_names: vec!["Camden".to_string()],
        }
    }

    async fn events(fixture: &Fixture) -> Vec<ProgressEvent> {
        let mut sub = fixture
            .registry
            .start(MatchRequest::new(OsmType::Relation, 62_149))
            .await
            .unwrap();
        let mut events = Vec::new();
        while let Some(event) = sub.recv().await {
            let last = event.is_final();
            events.push(event);
            if last {
                break;
            }
        }
        events
    }

    fn kinds(events: &[ProgressEvent]) -> Vec<&EventKind> {
        events.iter().map(|e| &e.kind).collect()
    }

    #[tokio::test]
    async fn pipeline_reaches_ready_with_candidates() {
        let fixture = setup("ready", 0, 0, 4);
        fixture.store.save_area(&area(AreaState::New)).await.unwrap();

        let events = events(&fixture).await;
        let kinds = kinds(&events);
        assert_eq!(kinds.first(), Some(&&EventKind::Connected));
        assert_eq!(kinds.last(), Some(&&EventKind::Done));
        assert!(kinds.contains(&&EventKind::GetWikidataItems));
        assert!(kinds.contains(&&EventKind::OverpassDone));
        assert!(kinds.contains(&&EventKind::Item {
            msg: "The Red Lion (Q100): 1 candidate found".to_string()
        }));

        let stored = fixture.store.get_area(AreaId::new(OsmType::Relation, 62_149)).await.unwrap().unwrap();
        assert_eq!(stored.state, AreaState::Ready);
        let candidates = fixture.store.load_candidates(77).await.unwrap();
        assert_eq!(candidates["Q100"][0].osm_id, 1);
        assert!(fixture.cache.contains("77.json"));

        while !fixture.registry.list().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            fixture.registry.start(MatchRequest::new(OsmType::Relation, 62_149)).await,
            Err(JobError::AlreadyDone { .. })
        ));
        std::fs::remove_dir_all(&fixture.dir).unwrap();
    }

    #[tokio::test]
    async fn entity_query_timeout_switches_to_chunks() {
        let fixture = setup("kb_timeout", 1, 0, 4);
        fixture.store.save_area(&area(AreaState::New)).await.unwrap();

        let events = events(&fixture).await;
        let kinds = kinds(&events);
        assert!(kinds.contains(&&EventKind::Msg {
            msg: "wikidata query timeout, retrying with smaller chunks.".to_string()
        }));
        assert_eq!(kinds.last(), Some(&&EventKind::Done));
        let stored = fixture.store.get_area(AreaId::new(OsmType::Relation, 62_149)).await.unwrap().unwrap();
        assert!(stored.wikidata_query_timeout);
        std::fs::remove_dir_all(&fixture.dir).unwrap();
    }

    async fn enriched_area(fixture: &Fixture) {
        fixture.store.save_area(&area(AreaState::TagsEnriched)).await.unwrap();
        let mut e = Entity::new("Q100");
        e.label = Some("The Red Lion".to_string());
        e.coordinate = Some(Coordinate::new(51.52, -0.05));
        e.criteria.insert("amenity=pub");
        fixture.store.save_entities(77, &[e]).await.unwrap();
    }

    #[tokio::test]
    async fn map_timeout_subdivides_chunk() {
        let fixture = setup("map_timeout", 0, 1, 4);
        enriched_area(&fixture).await;

        let events = events(&fixture).await;
        assert!(kinds(&events).contains(&&EventKind::Msg {
            msg: "overpass timeout, splitting chunk 0 into four".to_string()
        }));
        assert_eq!(kinds(&events).last(), Some(&&EventKind::Done));
        assert_eq!(*fixture.overpass.queries.lock().unwrap(), 2);
        assert!(fixture.cache.contains("77.json"));
        std::fs::remove_dir_all(&fixture.dir).unwrap();
    }

    #[tokio::test]
    async fn map_timeout_at_depth_limit_fails_the_fetch() {
        let fixture = setup("map_timeout_cap", 0, 10, 0);
        enriched_area(&fixture).await;

        let events = events(&fixture).await;
        assert_eq!(
            kinds(&events).last(),
            Some(&&EventKind::Error {
                msg: "overpass timeout for chunk 0".to_string()
            })
        );
        let stored = fixture.store.get_area(AreaId::new(OsmType::Relation, 62_149)).await.unwrap().unwrap();
        assert_eq!(stored.state, AreaState::FetchTimeout);
        std::fs::remove_dir_all(&fixture.dir).unwrap();
    }

    #[tokio::test]
    async fn unknown_area_is_not_found() {
        let fixture = setup("missing", 0, 0, 4);
        assert!(matches!(
            fixture.registry.start(MatchRequest::new(OsmType::Relation, 62_149)).await,
            Err(JobError::NotFound { .. })
        ));
        assert!(fixture.registry.list().is_empty());
    }

    #[tokio::test]
    async fn refresh_clears_cached_chunks() {
        let fixture = setup("refresh", 0, 0, 4);
        fixture.cache.write("77_000_004.json", b"{}").unwrap();
        fixture.store.save_area(&area(AreaState::Refresh)).await.unwrap();

        let events = events(&fixture).await;
        assert_eq!(kinds(&events).last(), Some(&&EventKind::Done));
        assert!(!fixture.cache.contains("77_000_004.json"));
        std::fs::remove_dir_all(&fixture.dir).unwrap();
    }

    async fn wait_until_idle(fixture: &Fixture) {
        while !fixture.registry.list().is_empty() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn panic_in_pipeline_ends_the_job() {
        let fixture = setup_with(
            "panic",
            OnePub {
                panics: true,
                ..OnePub::default()
            },
            0,
            4,
        );
        fixture.store.save_area(&area(AreaState::New)).await.unwrap();

        let events = events(&fixture).await;
        let Some(EventKind::Error { msg }) = kinds(&events).last().copied() else {
            panic!("no error event in {events:?}");
        };
        assert!(msg.starts_with("unexpected error"), "{msg}");
        assert!(msg.contains("query service returned garbage"), "{msg}");

        wait_until_idle(&fixture).await;
        let stored = fixture.store.get_area(AreaId::new(OsmType::Relation, 62_149)).await.unwrap().unwrap();
        assert_eq!(stored.state, AreaState::New);
        assert!(fixture.registry.start(MatchRequest::new(OsmType::Relation, 62_149)).await.is_ok());
        wait_until_idle(&fixture).await;
        std::fs::remove_dir_all(&fixture.dir).unwrap();
    }

    #[tokio::test]
    async fn stopped_job_resumes_from_saved_entity_list() {
        let gate = Arc::new(Notify::new());
        let fixture = setup_with(
            "stop_resume",
            OnePub {
                gate: Some(gate.clone()),
                ..OnePub::default()
            },
            0,
            4,
        );
        fixture.store.save_area(&area(AreaState::New)).await.unwrap();
        let id = AreaId::new(OsmType::Relation, 62_149);

        let mut sub = fixture.registry.start(MatchRequest::new(OsmType::Relation, 62_149)).await.unwrap();
        let mut last = None;
        while let Some(event) = sub.recv().await {
            if event.kind == EventKind::ItemsSaved {
                assert!(fixture.registry.stop(id));
                gate.notify_one();
            }
            let done = event.is_final();
            last = Some(event.kind);
            if done {
                break;
            }
        }
        assert_eq!(
            last,
            Some(EventKind::Error {
                msg: "job stopped".to_string()
            })
        );
        let stored = fixture.store.get_area(id).await.unwrap().unwrap();
        assert_eq!(stored.state, AreaState::EntityListLoaded);

        wait_until_idle(&fixture).await;
        gate.notify_one();
        let events = events(&fixture).await;
        let kinds = kinds(&events);
        assert_eq!(kinds.last(), Some(&&EventKind::Done));
        assert!(!kinds.contains(&&EventKind::GetWikidataItems));
        assert_eq!(*fixture.kb.bbox_queries.lock().unwrap(), 1);
        let stored = fixture.store.get_area(id).await.unwrap().unwrap();
        assert_eq!(stored.state, AreaState::Ready);
        std::fs::remove_dir_all(&fixture.dir).unwrap();
    }

    #[tokio::test]
    async fn vanished_candidates_are_reported() {
        let fixture = setup("removals", 0, 0, 4);
        fixture.store.save_area(&area(AreaState::New)).await.unwrap();
        let gone = Candidate {
            qid: "Q100".to_string(),
            osm_type: OsmType::Node,
            osm_id: 99,
            name: Some("Red Lion".to_string()),
            kind: MatchKind::Exact,
            distance: 12.0,
            tags: TagMap::default(),
            evidence: MatchEvidence::default(),
        };
        let mut previous = CandidateMap::new();
        previous.insert("Q100".to_string(), vec![gone]);
        fixture.store.save_candidates(77, &previous).await.unwrap();

        let events = events(&fixture).await;
        assert!(kinds(&events).contains(&&EventKind::Item {
            msg: "The Red Lion (Q100): node/99 no longer found".to_string()
        }));
        let candidates = fixture.store.load_candidates(77).await.unwrap();
        assert_eq!(candidates["Q100"].len(), 1);
        assert_eq!(candidates["Q100"][0].osm_id, 1);
        std::fs::remove_dir_all(&fixture.dir).unwrap();
    }

    #[tokio::test]
    async fn subscribing_after_the_job_ended_gets_the_last_event() {
        let fixture = setup("late", 0, 0, 4);
        enriched_area(&fixture).await;

        let mut sub = fixture.registry.start(MatchRequest::new(OsmType::Relation, 62_149)).await.unwrap();
        while let Some(event) = sub.recv().await {
            if event.is_final() {
                break;
            }
        }
        wait_until_idle(&fixture).await;

        let mut late = sub.job().subscribe();
        assert_eq!(late.recv().await.map(|e| e.kind), Some(EventKind::Connected));
        assert_eq!(late.recv().await.map(|e| e.kind), Some(EventKind::Done));
        assert!(late.recv().await.is_none());
        std::fs::remove_dir_all(&fixture.dir).unwrap();
    }

    #[test]
    fn empty_cells_have_no_query() {
        let mut a = area(AreaState::TagsEnriched);
        a.area_sq_km = 5000.0;
        let mut e = Entity::new("Q1");
        e.coordinate = Some(Coordinate::new(51.46, -0.19));
        e.criteria.insert("amenity=pub");

        let chunks = Orchestrator::map_chunks(&a, &[e], false);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.iter().filter(|c| c.oql.is_some()).count(), 1);
        assert!(chunks[0].oql.as_deref().is_some_and(|q| q.contains("amenity")));
    }

    #[test]
    fn item_lines() {
        let mut e = Entity::new("Q5");
        assert_eq!(candidate_line(&e, 0), "Q5 (Q5): 0 candidates found");
        e.label = Some("Old Mill".to_string());
        assert_eq!(candidate_line(&e, 1), "Old Mill (Q5): 1 candidate found");
    }
}
