//! Service configuration.
//!
//! Hierarchical merging: programmatic defaults, then `sentinel.yaml`, then
//! `SENTINEL_*` environment variables.

use std::collections::HashMap;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::models::EvidenceSource;
use crate::services::aggregator::SourceWeights;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid source weight for '{source_name}': {weight}. Must be within [0, 1]")]
    InvalidSourceWeight { source_name: String, weight: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "sentinel.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    /// Optional log directory; stdout only when unset.
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub auto_create_task: bool,
    pub catalog_ttl_secs: u64,
    pub evidence_expiration_days: i64,
    pub keep_processed_days: i64,
    pub sweep_interval_secs: u64,
    pub scan_interval_secs: u64,
    pub max_evidence_per_workload: usize,
    pub cleanup_batch_size: usize,
    /// Full replacement for the source weight table, keyed by source name.
    pub source_weights: Option<HashMap<String, f64>>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            auto_create_task: true,
            catalog_ttl_secs: 300,
            evidence_expiration_days: 7,
            keep_processed_days: 3,
            sweep_interval_secs: 3600,
            scan_interval_secs: 300,
            max_evidence_per_workload: 100,
            cleanup_batch_size: 1000,
            source_weights: None,
        }
    }
}

impl DetectionConfig {
    /// Convert the configured weight override into a weight table.
    /// Unrecognized source names are logged and skipped.
    pub fn weights(&self) -> Option<SourceWeights> {
        let table = self.source_weights.as_ref()?;
        let mut weights = HashMap::new();
        for (name, weight) in table {
            match EvidenceSource::from_str(name) {
                Some(source) => {
                    weights.insert(source, *weight);
                }
                None => {
                    tracing::warn!(source = %name, "ignoring weight for unknown source");
                }
            }
        }
        Some(SourceWeights::from_table(weights))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub detection: DetectionConfig,
}

impl SentinelConfig {
    /// Load with hierarchical merging: defaults, `sentinel.yaml`,
    /// `SENTINEL_*` environment variables (highest priority).
    pub fn load() -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file("sentinel.yaml"))
            .merge(Env::prefixed("SENTINEL_").split("__"))
            .extract()
            .context("Failed to extract configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file, with defaults underneath.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(self.logging.format.clone()));
        }

        if let Some(weights) = &self.detection.source_weights {
            for (source, weight) in weights {
                if !(0.0..=1.0).contains(weight) {
                    return Err(ConfigError::InvalidSourceWeight {
                        source_name: source.clone(),
                        weight: *weight,
                    });
                }
            }
        }
        Ok(())
    }
}
