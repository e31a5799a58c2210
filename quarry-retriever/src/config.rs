//! Retriever configuration.
//!
//! Settings come from a TOML file, the environment, or both: a file is read
//! first and environment variables override individual fields. Every field has
//! a default, so an empty file is a valid configuration.
//!
//! ```toml
//! default_k = 4
//! log_level = "info"
//!
//! [embedding]
//! backend = "remote"
//!
//! [embedding.remote]
//! base_url = "https://api.openrouter.ai/v1"
//! model = "text-embedding-3-small"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [index]
//! metric = "cosine"
//! strategy = { kind = "ivf_flat", lists = 16, probes = 4 }
//! ```

use crate::error::{Result, RetrieverError};
use crate::index::{DistanceMetric, IndexConfig};
use crate::loader::FailurePolicy;
use crate::pipeline::IndexBuilder;
use quarry_context::ChunkerConfig;
use quarry_embed::{EmbedBackend, EmbedConfig, EmbedError, create_provider};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Number of passages returned when the caller does not ask for a count.
pub const DEFAULT_TOP_K: usize = 4;

const ENV_PREFIX: &str = "QUARRY_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub embedding: EmbedConfig,
    pub chunking: ChunkerConfig,
    pub index: IndexConfig,
    pub default_k: usize,
    pub failure_policy: FailurePolicy,
    /// Used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            embedding: EmbedConfig::default(),
            chunking: ChunkerConfig::default(),
            index: IndexConfig::default(),
            default_k: DEFAULT_TOP_K,
            failure_policy: FailurePolicy::default(),
            log_level: "info".to_string(),
        }
    }
}

impl RetrieverConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| RetrieverError::configuration(format!("invalid configuration: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RetrieverError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Defaults overridden by the environment.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env()
    }

    /// Apply `QUARRY_*` overrides from the process environment.
    ///
    /// | Variable                  | Field                           |
    /// |---------------------------|---------------------------------|
    /// | `QUARRY_EMBED_BACKEND`    | `embedding.backend`             |
    /// | `QUARRY_EMBED_MODEL`      | `embedding.model_name`          |
    /// | `QUARRY_EMBED_DIMENSION`  | `embedding.dimension`           |
    /// | `QUARRY_EMBED_BATCH_SIZE` | `embedding.batch_size`          |
    /// | `QUARRY_MODEL_CACHE_DIR`  | `embedding.cache_dir`           |
    /// | `QUARRY_API_BASE`         | `embedding.remote.base_url`     |
    /// | `QUARRY_API_KEY`          | `embedding.remote.api_key`      |
    /// | `QUARRY_REMOTE_MODEL`     | `embedding.remote.model`        |
    /// | `QUARRY_CHUNK_SIZE`       | `chunking.chunk_size`           |
    /// | `QUARRY_CHUNK_OVERLAP`    | `chunking.chunk_overlap`        |
    /// | `QUARRY_INDEX_METRIC`     | `index.metric`                  |
    /// | `QUARRY_TOP_K`            | `default_k`                     |
    /// | `QUARRY_LOG_LEVEL`        | `log_level`                     |
    ///
    /// `OPENROUTER_API_BASE` and `OPENROUTER_API_KEY` are used when the
    /// corresponding `QUARRY_` variable is unset.
    pub fn with_env(self) -> Result<Self> {
        self.with_lookup(|name| std::env::var(name).ok())
    }

    fn with_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}")).filter(|value| !value.trim().is_empty())
        };

        if let Some(backend) = var("EMBED_BACKEND") {
            self.embedding.backend = EmbedBackend::from_str(&backend).map_err(config_error)?;
        }
        if let Some(model) = var("EMBED_MODEL") {
            self.embedding.model_name = model;
        }
        if let Some(dimension) = var("EMBED_DIMENSION") {
            self.embedding.dimension = parse_number("QUARRY_EMBED_DIMENSION", &dimension)?;
        }
        if let Some(batch_size) = var("EMBED_BATCH_SIZE") {
            self.embedding.batch_size = parse_number("QUARRY_EMBED_BATCH_SIZE", &batch_size)?;
        }
        if let Some(cache_dir) = var("MODEL_CACHE_DIR") {
            self.embedding.cache_dir = Some(cache_dir.into());
        }
        if let Some(base_url) = var("API_BASE").or_else(|| lookup("OPENROUTER_API_BASE")) {
            self.embedding.remote.base_url = base_url;
        }
        if let Some(api_key) = var("API_KEY").or_else(|| lookup("OPENROUTER_API_KEY")) {
            self.embedding.remote.api_key = Some(api_key);
        }
        if let Some(model) = var("REMOTE_MODEL") {
            self.embedding.remote.model = model;
        }
        if let Some(size) = var("CHUNK_SIZE") {
            self.chunking.chunk_size = parse_number("QUARRY_CHUNK_SIZE", &size)?;
        }
        if let Some(overlap) = var("CHUNK_OVERLAP") {
            self.chunking.chunk_overlap = parse_number("QUARRY_CHUNK_OVERLAP", &overlap)?;
        }
        if let Some(metric) = var("INDEX_METRIC") {
            self.index.metric = DistanceMetric::from_str(&metric)
                .map_err(|e| RetrieverError::configuration(format!("QUARRY_INDEX_METRIC: {e}")))?;
        }
        if let Some(k) = var("TOP_K") {
            self.default_k = parse_number("QUARRY_TOP_K", &k)?;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(self)
    }

    /// Check every setting without touching the network or disk.
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.embedding.validate().map_err(config_error)?;
        self.index.validate()?;
        if self.default_k == 0 {
            return Err(RetrieverError::configuration("default_k must be at least 1"));
        }
        Ok(())
    }

    /// Construct the configured embedding provider and wrap it in a builder.
    pub async fn index_builder(&self) -> Result<IndexBuilder> {
        let provider = create_provider(&self.embedding)
            .await
            .map_err(config_error)?;
        Ok(IndexBuilder::new(provider)
            .with_chunking(self.chunking)
            .with_index_config(self.index)
            .with_failure_policy(self.failure_policy))
    }
}

/// Configuration problems reported by the embedding crate surface as
/// [`RetrieverError::Configuration`]; anything else stays an embedding error.
fn config_error(err: EmbedError) -> RetrieverError {
    if err.is_configuration() {
        RetrieverError::Configuration(err.to_string())
    } else {
        RetrieverError::Embedding(err)
    }
}

fn parse_number(name: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| {
        RetrieverError::configuration(format!("{name} must be a non-negative integer, got {value:?}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SearchStrategy;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RetrieverConfig::default();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.default_k, DEFAULT_TOP_K);
        assert_eq!(config.index.metric, DistanceMetric::L2);
        assert_eq!(config.failure_policy, FailurePolicy::SkipAndReport);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_str() {
        let config = RetrieverConfig::from_toml_str(
            r#"
            default_k = 6

            [embedding]
            backend = "hashing"
            dimension = 128

            [chunking]
            chunk_size = 500
            chunk_overlap = 50

            [index]
            metric = "cosine"
            strategy = { kind = "ivf_flat", lists = 8, probes = 2 }
            "#,
        )
        .unwrap();

        assert_eq!(config.default_k, 6);
        assert_eq!(config.embedding.backend, EmbedBackend::Hashing);
        assert_eq!(config.embedding.dimension, 128);
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.index.metric, DistanceMetric::Cosine);
        assert_eq!(
            config.index.strategy,
            SearchStrategy::IvfFlat {
                lists: 8,
                probes: 2
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_toml_is_configuration_error() {
        let err = RetrieverConfig::from_toml_str("default_k = \"many\"").unwrap_err();
        assert!(matches!(err, RetrieverError::Configuration(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_level = \"debug\"\n[chunking]\nchunk_size = 300").unwrap();

        let config = RetrieverConfig::from_file(file.path()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.chunking.chunk_size, 300);
        assert_eq!(config.chunking.chunk_overlap, 200);

        let missing = RetrieverConfig::from_file("/nonexistent/quarry.toml").unwrap_err();
        assert!(matches!(missing, RetrieverError::Configuration(_)));
    }

    #[test]
    fn test_env_overrides() {
        let config = RetrieverConfig::default()
            .with_lookup(lookup(&[
                ("QUARRY_EMBED_BACKEND", "remote"),
                ("QUARRY_API_KEY", "sk-quarry"),
                ("QUARRY_CHUNK_SIZE", "800"),
                ("QUARRY_TOP_K", "10"),
                ("QUARRY_INDEX_METRIC", "cosine"),
            ]))
            .unwrap();

        assert_eq!(config.embedding.backend, EmbedBackend::Remote);
        assert_eq!(config.embedding.remote.api_key.as_deref(), Some("sk-quarry"));
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.default_k, 10);
        assert_eq!(config.index.metric, DistanceMetric::Cosine);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_openrouter_fallbacks() {
        let config = RetrieverConfig::default()
            .with_lookup(lookup(&[
                ("OPENROUTER_API_KEY", "sk-router"),
                ("OPENROUTER_API_BASE", "http://localhost:9000/v1"),
            ]))
            .unwrap();
        assert_eq!(config.embedding.remote.api_key.as_deref(), Some("sk-router"));
        assert_eq!(config.embedding.remote.base_url, "http://localhost:9000/v1");

        let preferred = RetrieverConfig::default()
            .with_lookup(lookup(&[
                ("OPENROUTER_API_KEY", "sk-router"),
                ("QUARRY_API_KEY", "sk-quarry"),
            ]))
            .unwrap();
        assert_eq!(preferred.embedding.remote.api_key.as_deref(), Some("sk-quarry"));
    }

    #[test]
    fn test_invalid_env_values() {
        let err = RetrieverConfig::default()
            .with_lookup(lookup(&[("QUARRY_CHUNK_SIZE", "large")]))
            .unwrap_err();
        assert!(err.to_string().contains("QUARRY_CHUNK_SIZE"));

        let err = RetrieverConfig::default()
            .with_lookup(lookup(&[("QUARRY_EMBED_BACKEND", "vendor-sdk")]))
            .unwrap_err();
        assert!(matches!(err, RetrieverError::Configuration(_)));
    }

    #[test]
    fn test_validate_reports_configuration_problems() {
        let mut config = RetrieverConfig::default();
        config.embedding = EmbedConfig::remote(Default::default());
        assert!(matches!(
            config.validate().unwrap_err(),
            RetrieverError::Configuration(_)
        ));

        let mut config = RetrieverConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(matches!(config.validate().unwrap_err(), RetrieverError::Chunk(_)));

        let mut config = RetrieverConfig::default();
        config.default_k = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_index_builder_uses_configured_backend() {
        let mut config = RetrieverConfig::default();
        config.embedding = EmbedConfig::hashing(48);

        let builder = config.index_builder().await.unwrap();
        assert_eq!(builder.provider().embedding_dimension(), Some(48));
    }
}
