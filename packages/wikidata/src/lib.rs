#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Knowledge-base client.
//!
//! Finds the entities located inside a bounding box with the OSM tag
//! criteria of their classes, fetches entity documents in batches, reads
//! revision ids for staleness checks, and enriches entities with the
//! categories and intro extract of their English encyclopedia article.

pub mod entity;
pub mod retry;
pub mod sparql;
pub mod wikipedia;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use wikimatch_match_models::Entity;
use wikimatch_place_models::BoundingBox;

pub use entity::{RawEntity, apply_detail, entity_from_item, enwiki_title, names_from_entity};
pub use sparql::QueryItem;

/// Maximum ids per `wbgetentities` call.
pub const ENTITY_PAGE_SIZE: usize = 50;

/// Errors from the knowledge base.
#[derive(Debug, thiserror::Error)]
pub enum WikidataError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The query service gave up on a query that ran too long.
    #[error("query timeout: {message}")]
    QueryTimeout {
        /// The start of the error page.
        message: String,
    },

    /// The service answered with an unexpected status.
    #[error("query error (HTTP {status}): {message}")]
    Query {
        /// HTTP status code.
        status: u16,
        /// The start of the response body.
        message: String,
    },

    /// More ids than one batch call accepts.
    #[error("too many entities: {count} (max {ENTITY_PAGE_SIZE})")]
    TooManyEntities {
        /// Number of ids requested.
        count: usize,
    },

    /// The response parsed but lacked the expected fields.
    #[error("unexpected response: {message}")]
    Response {
        /// What was missing.
        message: String,
    },
}

impl WikidataError {
    /// Whether a smaller bounding box may succeed.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::QueryTimeout { .. })
    }
}

/// The remote knowledge base.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Entities inside `bbox` that have tag criteria, by coordinate or by
    /// headquarters location.
    ///
    /// # Errors
    ///
    /// Returns [`WikidataError::QueryTimeout`] when the box is too big to
    /// query in one go, or another [`WikidataError`] on failure.
    async fn items_in_bbox(&self, bbox: &BoundingBox) -> Result<Vec<QueryItem>, WikidataError>;

    /// One entity, or `None` if the id does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`WikidataError`] if the request fails.
    async fn get_entity(&self, qid: &str) -> Result<Option<Entity>, WikidataError>;

    /// Raw documents for at most [`ENTITY_PAGE_SIZE`] ids. Missing ids are
    /// left out.
    ///
    /// # Errors
    ///
    /// Returns [`WikidataError::TooManyEntities`] for oversized batches, or
    /// another [`WikidataError`] on failure.
    async fn get_entities(&self, qids: &[String]) -> Result<Vec<Value>, WikidataError>;

    /// Latest revision id of an entity.
    ///
    /// # Errors
    ///
    /// Returns [`WikidataError`] if the request fails or the page is absent.
    async fn get_last_revision(&self, qid: &str) -> Result<u64, WikidataError>;

    /// Latest revision ids keyed by entity id.
    ///
    /// # Errors
    ///
    /// Returns [`WikidataError`] if a request fails.
    async fn get_last_revisions(&self, qids: &[String]) -> Result<BTreeMap<String, u64>, WikidataError>;

    /// Non-hidden categories of English articles, keyed by title.
    ///
    /// # Errors
    ///
    /// Returns [`WikidataError`] if the request fails.
    async fn get_categories(&self, titles: &[String]) -> Result<BTreeMap<String, Vec<String>>, WikidataError>;

    /// Intro extracts (HTML) of English articles, keyed by title.
    ///
    /// # Errors
    ///
    /// Returns [`WikidataError`] if the request fails.
    async fn get_extracts(&self, titles: &[String]) -> Result<BTreeMap<String, String>, WikidataError>;
}

/// Fetches documents for any number of ids, one batch call per
/// [`ENTITY_PAGE_SIZE`] ids, and applies them to `entities` by id.
///
/// # Errors
///
/// Returns [`WikidataError`] if a batch fails or a document is malformed.
pub async fn load_details<K: KnowledgeBase + ?Sized>(
    kb: &K,
    entities: &mut [Entity],
) -> Result<(), WikidataError> {
    let qids: Vec<String> = entities.iter().map(|e| e.qid.clone()).collect();
    let mut documents: BTreeMap<String, Value> = BTreeMap::new();
    for (num, page) in qids.chunks(ENTITY_PAGE_SIZE).enumerate() {
        log::debug!("entities: {}/{}", num * ENTITY_PAGE_SIZE, qids.len());
        for doc in kb.get_entities(page).await? {
            if let Some(id) = doc.get("id").and_then(Value::as_str) {
                documents.insert(id.to_string(), doc);
            }
        }
    }
    for entity in entities.iter_mut() {
        if let Some(doc) = documents.remove(&entity.qid) {
            apply_detail(entity, doc)?;
        }
    }
    Ok(())
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

#[derive(Debug, Deserialize)]
struct EntitiesResponse {
    entities: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    query: InfoQuery,
}

#[derive(Debug, Deserialize)]
struct InfoQuery {
    pages: Vec<InfoPage>,
}

#[derive(Debug, Deserialize)]
struct InfoPage {
    title: String,
    lastrevid: Option<u64>,
}

/// HTTP client for the entity API, the query service and the English
/// encyclopedia API.
#[derive(Debug, Clone)]
pub struct WikidataClient {
    client: reqwest::Client,
    api_url: String,
    query_url: String,
    wikipedia_url: String,
}

impl WikidataClient {
    /// # Errors
    ///
    /// Returns [`WikidataError::Http`] if the HTTP client cannot be built.
    pub fn new(
        api_url: &str,
        query_url: &str,
        wikipedia_url: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, WikidataError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            query_url: query_url.to_string(),
            wikipedia_url: wikipedia_url.to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<T, WikidataError> {
        let response = wikimatch_http::send::<_, WikidataError>(
            || {
                self.client
                    .get(url)
                    .query(&[("format", "json"), ("formatversion", "2")])
                    .query(params)
            },
            &retry::POLICY,
        )
        .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(WikidataError::Query {
                status: status.as_u16(),
                message: preview(&text),
            });
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn sparql(&self, query: &str) -> Result<Vec<sparql::Row>, WikidataError> {
        let response = wikimatch_http::send::<_, WikidataError>(
            || {
                self.client
                    .post(&self.query_url)
                    .form(&[("query", query), ("format", "json")])
            },
            &retry::POLICY,
        )
        .await?;
        let status = response.status();
        let text = response.text().await?;
        if status != reqwest::StatusCode::OK {
            if sparql::is_timeout_body(&text) {
                return Err(WikidataError::QueryTimeout {
                    message: preview(&text),
                });
            }
            return Err(WikidataError::Query {
                status: status.as_u16(),
                message: preview(&text),
            });
        }
        let parsed: sparql::QueryResponse = serde_json::from_str(&text)?;
        Ok(parsed.results.bindings)
    }

    async fn wikipedia_pages(
        &self,
        titles: &[String],
        params: &[(&str, &str)],
    ) -> Result<Vec<wikipedia::Page>, WikidataError> {
        let joined = titles.join("|");
        let mut all = vec![("action", "query"), ("continue", ""), ("titles", joined.as_str())];
        all.extend_from_slice(params);
        let response: wikipedia::PagesResponse = self.get_json(&self.wikipedia_url, &all).await?;
        Ok(response.query.pages)
    }
}

#[async_trait]
impl KnowledgeBase for WikidataClient {
    async fn items_in_bbox(&self, bbox: &BoundingBox) -> Result<Vec<QueryItem>, WikidataError> {
        let mut items = BTreeMap::new();
        for query in [sparql::item_tag_query(bbox), sparql::hq_item_tag_query(bbox)] {
            let rows = self.sparql(&query).await?;
            log::debug!("{} result rows", rows.len());
            sparql::collect_item_rows(&rows, &mut items);
        }
        Ok(items.into_values().collect())
    }

    async fn get_entity(&self, qid: &str) -> Result<Option<Entity>, WikidataError> {
        let Some(doc) = self.get_entities(&[qid.to_string()]).await?.into_iter().next() else {
            return Ok(None);
        };
        let mut entity = Entity::new(qid);
        apply_detail(&mut entity, doc)?;
        Ok(Some(entity))
    }

    async fn get_entities(&self, qids: &[String]) -> Result<Vec<Value>, WikidataError> {
        if qids.is_empty() {
            return Ok(Vec::new());
        }
        if qids.len() > ENTITY_PAGE_SIZE {
            return Err(WikidataError::TooManyEntities { count: qids.len() });
        }
        let ids = qids.join("|");
        let response: EntitiesResponse = self
            .get_json(&self.api_url, &[("action", "wbgetentities"), ("ids", ids.as_str())])
            .await?;
        let entities = response.entities.ok_or_else(|| WikidataError::Response {
            message: format!("no entities in reply for {ids}"),
        })?;
        Ok(entities
            .into_values()
            .filter(|doc| doc.get("missing").is_none())
            .collect())
    }

    async fn get_last_revision(&self, qid: &str) -> Result<u64, WikidataError> {
        self.get_last_revisions(&[qid.to_string()])
            .await?
            .remove(qid)
            .ok_or_else(|| WikidataError::Response {
                message: format!("no revision for {qid}"),
            })
    }

    async fn get_last_revisions(&self, qids: &[String]) -> Result<BTreeMap<String, u64>, WikidataError> {
        let mut revisions = BTreeMap::new();
        for page in qids.chunks(ENTITY_PAGE_SIZE) {
            let titles = page.join("|");
            let response: InfoResponse = self
                .get_json(
                    &self.api_url,
                    &[("action", "query"), ("prop", "info"), ("titles", titles.as_str())],
                )
                .await?;
            revisions.extend(
                response
                    .query
                    .pages
                    .into_iter()
                    .filter_map(|p| Some((p.title, p.lastrevid?))),
            );
        }
        Ok(revisions)
    }

    async fn get_categories(&self, titles: &[String]) -> Result<BTreeMap<String, Vec<String>>, WikidataError> {
        let pages = self
            .wikipedia_pages(
                titles,
                &[("prop", "categories"), ("cllimit", "max"), ("clshow", "!hidden")],
            )
            .await?;
        Ok(wikipedia::categories_from_pages(pages))
    }

    async fn get_extracts(&self, titles: &[String]) -> Result<BTreeMap<String, String>, WikidataError> {
        let pages = self
            .wikipedia_pages(
                titles,
                &[("prop", "extracts"), ("exlimit", "20"), ("exintro", "1")],
            )
            .await?;
        Ok(wikipedia::extracts_from_pages(pages))
    }
}
