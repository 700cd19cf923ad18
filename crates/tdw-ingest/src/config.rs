//! Configuration management
//!
//! - `config.yaml`: which sources and datasets are enabled, plus ingest
//!   settings. Loaded with the `config` crate; `TDW__` environment variables
//!   override file values (`TDW__INGEST__LAYER=silver`).
//! - `<datasets_dir>/<source>/config.yaml`: base URL, timeout and header sets
//!   of one source.
//! - Database settings come from the environment.

use crate::error::{IngestError, Result};
use crate::fetch::DEFAULT_TIMEOUT_SECS;
use crate::params::DEFAULT_MAX_PARAMETER_SETS;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default run configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Default directory holding per-source configuration and schemas.
pub const DEFAULT_DATASETS_DIR: &str = "datasets";

/// Default storage layer datasets are written into.
pub const DEFAULT_LAYER: &str = "bronze";

/// Prefix of environment variables overriding the run configuration.
pub const ENV_PREFIX: &str = "TDW";

/// Default PostgreSQL port.
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Run configuration
// ============================================================================

/// Contents of `config.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    #[serde(default)]
    pub sources: BTreeMap<String, SourceToggle>,
    #[serde(default)]
    pub ingest: IngestSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceToggle {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetToggle>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetToggle {
    #[serde(default)]
    pub enabled: bool,
}

/// Settings applied to every dataset of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestSettings {
    /// Namespace datasets are written into
    #[serde(default = "default_layer")]
    pub layer: String,
    /// Upper bound on parameter sets fetched per dataset (`null` = unbounded)
    #[serde(default = "default_max_parameter_sets")]
    pub max_parameter_sets: Option<usize>,
}

fn default_layer() -> String {
    DEFAULT_LAYER.to_string()
}

fn default_max_parameter_sets() -> Option<usize> {
    Some(DEFAULT_MAX_PARAMETER_SETS)
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            layer: default_layer(),
            max_parameter_sets: default_max_parameter_sets(),
        }
    }
}

impl RunConfig {
    /// Load `config.yaml` with the `TDW__` environment overlay.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(IngestError::config(format!(
                "Run configuration not found: {}",
                path.display()
            )));
        }

        let config: Self = ::config::Config::builder()
            .add_source(
                ::config::File::from(path.to_path_buf()).format(::config::FileFormat::Yaml),
            )
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse YAML text without environment overrides.
    pub fn parse(yaml: &str) -> Result<Self> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::File::from_str(yaml, ::config::FileFormat::Yaml))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.layer.trim().is_empty() {
            return Err(IngestError::config("ingest.layer cannot be empty"));
        }
        Ok(())
    }

    pub fn source_enabled(&self, source: &str) -> bool {
        self.sources.get(source).is_some_and(|s| s.enabled)
    }

    pub fn dataset_enabled(&self, source: &str, dataset: &str) -> bool {
        self.sources
            .get(source)
            .and_then(|s| s.datasets.get(dataset))
            .is_some_and(|d| d.enabled)
    }
}

// ============================================================================
// Source configuration
// ============================================================================

/// Contents of `<datasets_dir>/<source>/config.yaml` after credential binding
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    #[serde(default)]
    pub variables: SourceVariables,
    /// Named header sets, e.g. `rapidapi: {x-rapidapi-key: ...}`
    #[serde(default)]
    pub headers: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceVariables {
    #[serde(default)]
    pub base_url: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for SourceVariables {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: default_timeout(),
        }
    }
}

impl SourceConfig {
    /// `<datasets_dir>/<source>/config.yaml`
    pub fn path(datasets_dir: impl AsRef<Path>, source: &str) -> PathBuf {
        datasets_dir.as_ref().join(source).join("config.yaml")
    }

    /// Read a source configuration as an untyped document, before any
    /// credential substitution.
    pub fn load_raw(datasets_dir: impl AsRef<Path>, source: &str) -> Result<Value> {
        let path = Self::path(datasets_dir, source);
        if !path.exists() {
            return Err(IngestError::config(format!(
                "Source configuration not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(&path)?;
        let value: Value = serde_yaml::from_str(&content).map_err(|e| {
            IngestError::config(format!("Malformed source configuration {}: {}", path.display(), e))
        })?;

        // an empty file parses as null
        Ok(if value.is_null() {
            Value::Object(Default::default())
        } else {
            value
        })
    }

    /// Type a (substituted) configuration document.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| IngestError::config(format!("Invalid source configuration: {}", e)))
    }
}

/// `<datasets_dir>/<source>/schema/<dataset>.yaml`
pub fn schema_path(datasets_dir: impl AsRef<Path>, source: &str, dataset: &str) -> PathBuf {
    datasets_dir
        .as_ref()
        .join(source)
        .join("schema")
        .join(format!("{}.yaml", dataset))
}

// ============================================================================
// Database configuration
// ============================================================================

/// PostgreSQL connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_POSTGRES_PORT,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl DatabaseConfig {
    /// Read `POSTGRES_*` and `DATABASE_*` variables.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            host: std::env::var("POSTGRES_HOST").unwrap_or_default(),
            port: std::env::var("POSTGRES_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_POSTGRES_PORT),
            database: std::env::var("POSTGRES_DB").unwrap_or_default(),
            user: std::env::var("POSTGRES_USER").unwrap_or_default(),
            password: std::env::var("POSTGRES_PASSWORD").unwrap_or_default(),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
            connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(IngestError::config("POSTGRES_HOST is not set"));
        }
        if self.database.is_empty() {
            return Err(IngestError::config("POSTGRES_DB is not set"));
        }
        if self.user.is_empty() {
            return Err(IngestError::config("POSTGRES_USER is not set"));
        }
        if self.max_connections == 0 {
            return Err(IngestError::config(
                "DATABASE_MAX_CONNECTIONS must be greater than 0",
            ));
        }
        Ok(())
    }
}
