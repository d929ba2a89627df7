//! Server configuration.
//!
//! Read from the TOML file named by `WIKIMATCH_CONFIG` (default
//! `wikimatch.toml`); a missing file means all defaults. `BIND_ADDR` and
//! `PORT` override the listen address.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::ServerError;

/// Default job-control port.
pub const DEFAULT_PORT: u16 = 6030;

const DEFAULT_CONFIG_FILE: &str = "wikimatch.toml";

/// Everything the server needs to wire up its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Root for areas, entities, candidates, cached chunks and run logs.
    pub data_dir: PathBuf,
    /// Overpass instance, without `/api`.
    pub overpass_url: String,
    pub wikidata_api_url: String,
    pub wikidata_query_url: String,
    pub wikipedia_api_url: String,
    pub user_agent: String,
    /// Merged payloads larger than this are refused as out of memory.
    pub bulk_load_max_bytes: u64,
    /// Accept bare address nodes as candidates.
    pub match_address_nodes: bool,
    /// Times a timed-out chunk may be split.
    pub max_subdivide_depth: usize,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("data"),
            overpass_url: "https://overpass-api.de".to_string(),
            wikidata_api_url: "https://www.wikidata.org/w/api.php".to_string(),
            wikidata_query_url: "https://query.wikidata.org/bigdata/namespace/wdq/sparql".to_string(),
            wikipedia_api_url: "https://en.wikipedia.org/w/api.php".to_string(),
            user_agent: concat!("wikimatch/", env!("CARGO_PKG_VERSION")).to_string(),
            bulk_load_max_bytes: 2 << 30,
            match_address_nodes: false,
            max_subdivide_depth: 4,
            request_timeout_secs: 660,
        }
    }
}

impl ServerConfig {
    /// Loads the configuration file and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if the file is not valid TOML or a
    /// `PORT` override is not a port number, or [`ServerError::Io`] if the
    /// file exists but cannot be read.
    pub fn load() -> Result<Self, ServerError> {
        let path = std::env::var("WIKIMATCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_overrides(
            std::env::var("BIND_ADDR").ok(),
            std::env::var("PORT").ok(),
        )?;
        Ok(config)
    }

    /// # Errors
    ///
    /// See [`Self::load`].
    pub fn from_file(path: &Path) -> Result<Self, ServerError> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                log::info!("config from {}", path.display());
                Self::parse(&text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if `text` is not a valid config.
    pub fn parse(text: &str) -> Result<Self, ServerError> {
        toml::from_str(text).map_err(|e| ServerError::Config {
            message: e.to_string(),
        })
    }

    fn apply_overrides(&mut self, bind_addr: Option<String>, port: Option<String>) -> Result<(), ServerError> {
        if let Some(addr) = bind_addr {
            self.bind_addr = addr;
        }
        if let Some(port) = port {
            self.port = port.parse().map_err(|_| ServerError::Config {
                message: format!("PORT {port:?} is not a port number"),
            })?;
        }
        Ok(())
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("overpass")
    }

    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = ServerConfig::parse(
            r#"
data_dir = "/var/lib/wikimatch"
match_address_nodes = true
max_subdivide_depth = 2
"#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/wikimatch"));
        assert!(config.match_address_nodes);
        assert_eq!(config.max_subdivide_depth, 2);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.logs_dir(), PathBuf::from("/var/lib/wikimatch/logs"));
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        assert!(matches!(
            ServerConfig::parse("port = \"six\""),
            Err(ServerError::Config { .. })
        ));
    }

    #[test]
    fn env_overrides() {
        let mut config = ServerConfig::default();
        config
            .apply_overrides(Some("0.0.0.0".to_string()), Some("7000".to_string()))
            .unwrap();
        assert_eq!((config.bind_addr.as_str(), config.port), ("0.0.0.0", 7000));
        assert!(config.apply_overrides(None, Some("http".to_string())).is_err());
    }

    #[test]
    fn missing_file_is_defaults() {
        let path = std::env::temp_dir().join("wikimatch_no_such_config.toml");
        assert_eq!(ServerConfig::from_file(&path).unwrap(), ServerConfig::default());
    }
}
