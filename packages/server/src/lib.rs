#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Job-control server for area matching jobs.
//!
//! Listens on TCP and speaks netstrings. Each connection carries one
//! command; `match` streams the job's progress events back, one
//! acknowledged frame at a time. All collaborators are built here from a
//! [`ServerConfig`] and shared through one [`JobRegistry`].

pub mod config;
pub mod handlers;
pub mod netstring;

use std::sync::Arc;

use tokio::net::TcpListener;
use wikimatch_job::{JobRegistry, JsonAreaStore, LogNotifier, MemoryLoader, Orchestrator, Settings};
use wikimatch_overpass::{OverpassClient, OverpassError};
use wikimatch_queue::{ChunkCache, FetchScheduler};
use wikimatch_wikidata::{WikidataClient, WikidataError};

pub use config::ServerConfig;
pub use netstring::NetstringError;

/// Errors that stop the server or end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Socket or file failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The configuration file or an override is invalid.
    #[error("config: {message}")]
    Config {
        /// Parser message.
        message: String,
    },

    /// A frame could not be read, written or acknowledged.
    #[error(transparent)]
    Netstring(#[from] NetstringError),

    /// A command body is not valid JSON for its command.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The map-extract client could not be built.
    #[error(transparent)]
    Overpass(#[from] OverpassError),

    /// The knowledge-base client could not be built.
    #[error(transparent)]
    Wikidata(#[from] WikidataError),

    /// The command verb is not recognised.
    #[error("{message}")]
    Command {
        /// What was wrong.
        message: String,
    },
}

/// Builds the job registry and starts the fetch worker.
///
/// # Errors
///
/// Returns [`ServerError::Overpass`] or [`ServerError::Wikidata`] if an
/// HTTP client cannot be built.
pub fn build_registry(config: &ServerConfig) -> Result<(Arc<JobRegistry>, FetchScheduler), ServerError> {
    let timeout = config.request_timeout();
    let overpass = OverpassClient::new(&config.overpass_url, &config.user_agent, timeout)?;
    let wikidata = WikidataClient::new(
        &config.wikidata_api_url,
        &config.wikidata_query_url,
        &config.wikipedia_api_url,
        &config.user_agent,
        timeout,
    )?;

    let cache = ChunkCache::new(config.cache_dir());
    let notifier = Arc::new(LogNotifier);
    let (scheduler, _worker) = FetchScheduler::start(Arc::new(overpass), cache.clone(), notifier.clone());

    let orchestrator = Orchestrator::new(
        Arc::new(wikidata),
        scheduler.clone(),
        cache,
        Arc::new(JsonAreaStore::new(config.store_dir())),
        Arc::new(MemoryLoader::new(config.bulk_load_max_bytes)),
        notifier,
        Settings {
            match_address_nodes: config.match_address_nodes,
            max_subdivide_depth: config.max_subdivide_depth,
            logs_dir: Some(config.logs_dir()),
        },
    );
    Ok((JobRegistry::new(Arc::new(orchestrator)), scheduler))
}

/// Accepts connections until the listener fails, one task per connection.
///
/// # Errors
///
/// Returns [`ServerError::Io`] if accepting a connection fails.
pub async fn serve(listener: TcpListener, registry: Arc<JobRegistry>) -> Result<(), ServerError> {
    loop {
        let (mut socket, peer) = listener.accept().await?;
        log::debug!("connection from {peer}");
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if let Err(e) = handlers::handle_connection(&mut socket, &registry).await {
                log::warn!("connection from {peer}: {e}");
            }
        });
    }
}

/// Loads the configuration, binds the listener and serves forever.
///
/// # Errors
///
/// Returns [`ServerError`] if configuration, client setup or binding
/// fails.
pub async fn run() -> Result<(), ServerError> {
    let config = ServerConfig::load()?;
    let (registry, scheduler) = build_registry(&config)?;

    let listener = TcpListener::bind((config.bind_addr.as_str(), config.port)).await?;
    log::info!("Starting server on {}:{}", config.bind_addr, config.port);

    let result = serve(listener, registry).await;
    scheduler.shutdown();
    result
}
