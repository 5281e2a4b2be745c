//! Ledger configuration: a TOML file overlaid with environment variables.
//!
//! ```toml
//! creator = "0xcreator"
//! backend = "0xbackend"
//! listing_policy = "self_service"
//! event_buffer = 1024
//!
//! [server]
//! port = 8080
//! rate_limit = 60
//! api_key = "secret"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vnf_ledger_engine::config::DEFAULT_EVENT_BUFFER;
use vnf_ledger_engine::{EngineConfig, Identity, LedgerError, LifecycleEngine, ListingPolicy};
use vnf_ledger_storage::MemoryStorage;

/// Default HTTP port.
pub(crate) const DEFAULT_PORT: u16 = 8080;

/// Default rate limit: 60 requests per minute per IP.
pub(crate) const DEFAULT_RATE_LIMIT: u64 = 60;

const ENV_CREATOR: &str = "VNF_LEDGER_CREATOR";
const ENV_BACKEND: &str = "VNF_LEDGER_BACKEND";
const ENV_RATE_LIMIT: &str = "VNF_LEDGER_RATE_LIMIT";
const ENV_API_KEY: &str = "VNF_LEDGER_API_KEY";

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{var}: invalid value '{value}'")]
    InvalidEnv { var: &'static str, value: String },
    #[error("no creator identity configured (set `creator` or VNF_LEDGER_CREATOR)")]
    MissingCreator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ServerConfig {
    pub(crate) port: u16,
    /// Requests per minute per client IP.
    pub(crate) rate_limit: u64,
    /// When set, every endpoint except `/health` requires this key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_PORT,
            rate_limit: DEFAULT_RATE_LIMIT,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct LedgerConfig {
    /// Identity allowed to rotate the backend. Fixed for the ledger's life.
    pub(crate) creator: String,
    /// Backend installed by the creator at start-up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) backend: Option<String>,
    pub(crate) listing_policy: ListingPolicy,
    pub(crate) event_buffer: usize,
    pub(crate) server: ServerConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            creator: String::new(),
            backend: None,
            listing_policy: ListingPolicy::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            server: ServerConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Load from `path` (defaults when absent), apply process environment
    /// overrides, and validate.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => LedgerConfig::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay values from `lookup`. Empty variables are ignored.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        if let Some(creator) = var(ENV_CREATOR) {
            self.creator = creator;
        }
        if let Some(backend) = var(ENV_BACKEND) {
            self.backend = Some(backend);
        }
        if let Some(raw) = var(ENV_RATE_LIMIT) {
            self.server.rate_limit = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_RATE_LIMIT,
                value: raw,
            })?;
        }
        if let Some(key) = var(ENV_API_KEY) {
            self.server.api_key = Some(key);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.creator.is_empty() {
            return Err(ConfigError::MissingCreator);
        }
        Ok(())
    }

    pub(crate) fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            listing_policy: self.listing_policy,
            event_buffer: self.event_buffer,
        }
    }

    /// A fresh in-memory engine, with the configured backend installed by
    /// the creator.
    pub(crate) fn build_engine(&self) -> Result<LifecycleEngine<MemoryStorage>, LedgerError> {
        let creator = Identity::new(self.creator.clone());
        let mut engine = LifecycleEngine::with_creator(
            MemoryStorage::new(),
            creator.clone(),
            self.engine_config(),
        );
        if let Some(backend) = &self.backend {
            engine.set_backend(&creator, Identity::new(backend.clone()))?;
        }
        Ok(engine)
    }

    /// The effective configuration as TOML, with the API key masked.
    pub(crate) fn to_redacted_toml(&self) -> Result<String, toml::ser::Error> {
        let mut shown = self.clone();
        if shown.server.api_key.is_some() {
            shown.server.api_key = Some("********".to_string());
        }
        toml::to_string_pretty(&shown)
    }
}
