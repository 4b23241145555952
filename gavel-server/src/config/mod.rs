//! Configuration module for gavel-server.
//!
//! Handles loading configuration from the TOML file, CLI overrides and
//! environment variables, and turning it into the runtime values the
//! pipeline consumes.

pub mod file;

use crate::config::file::{CacheBackend, FileConfig};
use gavel_core::config::{PipelineConfig, QueueConfig};
use gavel_core::stores::postgres::PgChangeFeedOptions;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub listen: SocketAddr,
    pub pipeline: PipelineConfig,
    pub queue: QueueConfig,
    pub feed: PgChangeFeedOptions,
    pub cache_backend: CacheBackend,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Read the file, apply CLI overrides and validate.
    ///
    /// A missing file is not an error; every setting has a default.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let content = match std::fs::read_to_string(&self.config_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %self.config_path.display(),
                    "Config file not found, using defaults"
                );
                String::new()
            }
            Err(e) => return Err(e.into()),
        };
        self.parse(&content)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn parse(&self, content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(content)?;
        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }
        validate(&file_config)?;
        Ok(build_loaded_config(file_config))
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let p = &config.pipeline;
    let nonzero = [
        ("pipeline.about_to_close_threshold_secs", p.about_to_close_threshold_secs),
        ("pipeline.reconciliation_interval_secs", p.reconciliation_interval_secs),
        ("pipeline.popularity_interval_secs", p.popularity_interval_secs),
        ("pipeline.recent_auctions_max", p.recent_auctions_max as u64),
        ("pipeline.popular_auctions_max", p.popular_auctions_max as u64),
        ("pipeline.cache_ttl_secs", p.cache_ttl_secs),
        ("pipeline.call_timeout_ms", p.call_timeout_ms),
        ("pipeline.reconcile_page_size", u64::from(p.reconcile_page_size)),
        ("queue.max_deliveries", u64::from(config.queue.max_deliveries)),
        ("queue.visibility_timeout_secs", config.queue.visibility_timeout_secs),
        ("feed.batch_size", u64::from(config.feed.batch_size)),
    ];
    if let Some((name, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
        return Err(ConfigError::ValidationError(format!(
            "{name} must be greater than zero"
        )));
    }
    if config.feed.consumer.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "feed.consumer must not be empty".to_string(),
        ));
    }
    if config
        .feed
        .partitions
        .as_ref()
        .is_some_and(|partitions| partitions.is_empty())
    {
        return Err(ConfigError::ValidationError(
            "feed.partitions must list at least one partition when set".to_string(),
        ));
    }
    Ok(())
}

fn build_loaded_config(file_config: FileConfig) -> LoadedConfig {
    let p = file_config.pipeline;
    let q = file_config.queue;
    let f = file_config.feed;
    LoadedConfig {
        listen: file_config.server.listen,
        pipeline: PipelineConfig {
            about_to_close_threshold: Duration::from_secs(p.about_to_close_threshold_secs),
            reconciliation_interval: Duration::from_secs(p.reconciliation_interval_secs),
            popularity_interval: Duration::from_secs(p.popularity_interval_secs),
            recent_auctions_max: p.recent_auctions_max,
            popular_auctions_max: p.popular_auctions_max,
            cache_ttl: Duration::from_secs(p.cache_ttl_secs),
            call_timeout: Duration::from_millis(p.call_timeout_ms),
            max_transient_retries: p.max_transient_retries,
            reconcile_page_size: p.reconcile_page_size,
            enqueue_due_closures: p.enqueue_due_closures,
        },
        queue: QueueConfig {
            max_deliveries: q.max_deliveries,
            visibility_timeout: Duration::from_secs(q.visibility_timeout_secs),
            receive_wait: Duration::from_millis(q.receive_wait_ms),
        },
        feed: PgChangeFeedOptions {
            consumer: f.consumer,
            batch_size: f.batch_size,
            wait: Duration::from_millis(f.wait_ms),
            settle: Duration::from_millis(f.settle_ms),
            partitions: f.partitions,
        },
        cache_backend: file_config.cache.backend,
    }
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(listen: Option<SocketAddr>) -> ConfigLoader {
        ConfigLoader::new("./does-not-exist.toml", listen)
    }

    #[test]
    fn test_defaults_match_pipeline_defaults() {
        let loaded = loader(None).parse("").unwrap();
        assert_eq!(loaded.pipeline, PipelineConfig::default());
        assert_eq!(loaded.queue, QueueConfig::default());
        assert_eq!(loaded.cache_backend, CacheBackend::Postgres);
    }

    #[test]
    fn test_listen_override_wins() {
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let loaded = loader(Some(addr))
            .parse("[server]\nlisten = \"0.0.0.0:1\"")
            .unwrap();
        assert_eq!(loaded.listen, addr);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let err = loader(None)
            .parse("[pipeline]\nreconciliation_interval_secs = 0")
            .unwrap_err();
        assert!(err.to_string().contains("reconciliation_interval_secs"));
    }

    #[test]
    fn test_zero_list_size_is_rejected() {
        assert!(
            loader(None)
                .parse("[pipeline]\nrecent_auctions_max = 0")
                .is_err()
        );
    }

    #[test]
    fn test_empty_partition_list_is_rejected() {
        assert!(loader(None).parse("[feed]\npartitions = []").is_err());
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let loaded = loader(None).load().unwrap();
        assert_eq!(loaded.feed.consumer, "cache-sync");
    }
}
