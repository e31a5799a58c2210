//! Configuration for embedding providers
//!
//! One [`EmbedConfig`] selects a backend and carries the settings for every
//! backend; only the selected one is validated and used. The same value must
//! be used to embed documents and queries, which is why [`EmbedConfig::model_id`]
//! is recorded next to every index built with it.

use crate::error::{EmbedError, Result};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default local model, 384-dimensional.
pub const DEFAULT_LOCAL_MODEL: &str = "all-MiniLM-L6-v2";

/// Default OpenAI-compatible endpoint base URL.
pub const DEFAULT_REMOTE_BASE_URL: &str = "https://api.openrouter.ai/v1";

/// Default remote embedding model, 1536-dimensional.
pub const DEFAULT_REMOTE_MODEL: &str = "text-embedding-3-small";

/// Default dimension for the hashing backend.
pub const DEFAULT_HASHING_DIMENSION: usize = 384;

/// Which embedding implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedBackend {
    /// Local ONNX inference through fastembed
    #[default]
    Local,
    /// OpenAI-compatible HTTP `/embeddings` endpoint
    Remote,
    /// Offline feature hashing, no model required
    Hashing,
}

impl FromStr for EmbedBackend {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" | "fastembed" => Ok(Self::Local),
            "remote" | "http" | "openai" => Ok(Self::Remote),
            "hashing" | "hash" => Ok(Self::Hashing),
            other => Err(EmbedError::invalid_config(format!(
                "unsupported embedding backend: {other:?} (expected local, remote or hashing)"
            ))),
        }
    }
}

impl std::fmt::Display for EmbedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Hashing => "hashing",
        };
        f.write_str(name)
    }
}

/// Settings for the remote HTTP backend.
#[derive(Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL; requests go to `{base_url}/embeddings`
    #[builder(default = "DEFAULT_REMOTE_BASE_URL.to_string()")]
    pub base_url: String,
    /// Bearer token. Never serialized.
    #[builder(default, setter(into, strip_option))]
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model identifier sent with every request
    #[builder(default = "DEFAULT_REMOTE_MODEL.to_string()")]
    pub model: String,
    /// Per-request timeout in seconds
    #[builder(default = "30")]
    pub timeout_secs: u64,
    /// Total attempts per batch, including the first one
    #[builder(default = "3")]
    pub max_attempts: usize,
    /// Delay before the first retry; doubles on every further retry
    #[builder(default = "500")]
    pub initial_backoff_ms: u64,
    /// Batches in flight at the same time
    #[builder(default = "4")]
    pub max_concurrent_requests: usize,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff_ms", &self.initial_backoff_ms)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .finish()
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REMOTE_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_REMOTE_MODEL.to_string(),
            timeout_secs: 30,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_concurrent_requests: 4,
        }
    }
}

impl RemoteConfig {
    /// Create a new remote configuration using the builder
    pub fn builder() -> RemoteConfigBuilder {
        RemoteConfigBuilder::default()
    }

    /// Full URL of the embeddings endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10) as u32;
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(1u64 << exponent))
    }

    /// Validate the remote settings; nothing here performs I/O.
    pub fn validate(&self) -> Result<()> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {}
            _ => {
                return Err(EmbedError::invalid_config(
                    "remote embedding backend requires an API key",
                ));
            }
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(EmbedError::invalid_config(format!(
                "base URL must start with http:// or https://, got {:?}",
                self.base_url
            )));
        }
        if self.model.trim().is_empty() {
            return Err(EmbedError::invalid_config("remote model identifier is empty"));
        }
        if self.max_attempts == 0 {
            return Err(EmbedError::invalid_config("max_attempts must be at least 1"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(EmbedError::invalid_config(
                "max_concurrent_requests must be at least 1",
            ));
        }
        if self.timeout_secs == 0 {
            return Err(EmbedError::invalid_config("timeout_secs must be at least 1"));
        }
        Ok(())
    }
}

/// Configuration for embedding providers
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
#[serde(default)]
pub struct EmbedConfig {
    /// Backend to construct
    #[builder(default)]
    pub backend: EmbedBackend,
    /// Name of the local fastembed model
    #[builder(default = "DEFAULT_LOCAL_MODEL.to_string()")]
    pub model_name: String,
    /// Where fastembed keeps downloaded model files
    #[builder(default, setter(into, strip_option))]
    pub cache_dir: Option<PathBuf>,
    /// Maximum number of texts per embedding call
    #[builder(default = "32")]
    pub batch_size: usize,
    /// Whether to L2-normalize embeddings
    #[builder(default = "true")]
    pub normalize: bool,
    /// Vector dimension of the hashing backend
    #[builder(default = "DEFAULT_HASHING_DIMENSION")]
    pub dimension: usize,
    /// Prepended to every query before embedding (e.g. `"query: "` for E5 models)
    #[builder(default, setter(into, strip_option))]
    pub query_prefix: Option<String>,
    /// Prepended to every document chunk before embedding
    #[builder(default, setter(into, strip_option))]
    pub document_prefix: Option<String>,
    /// Settings for [`EmbedBackend::Remote`]
    #[builder(default)]
    pub remote: RemoteConfig,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            backend: EmbedBackend::Local,
            model_name: DEFAULT_LOCAL_MODEL.to_string(),
            cache_dir: None,
            batch_size: 32,
            normalize: true,
            dimension: DEFAULT_HASHING_DIMENSION,
            query_prefix: None,
            document_prefix: None,
            remote: RemoteConfig::default(),
        }
    }
}

impl EmbedConfig {
    /// Create a new embedding configuration using the builder
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder::default()
    }

    /// Local fastembed model by name
    pub fn local(model_name: impl Into<String>) -> Self {
        Self {
            backend: EmbedBackend::Local,
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    /// Remote endpoint with the given settings
    pub fn remote(remote: RemoteConfig) -> Self {
        Self {
            backend: EmbedBackend::Remote,
            remote,
            ..Self::default()
        }
    }

    /// Offline hashing embedder with the given dimension
    pub fn hashing(dimension: usize) -> Self {
        Self {
            backend: EmbedBackend::Hashing,
            dimension,
            ..Self::default()
        }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set whether to normalize embeddings (builder style)
    pub fn with_normalize(self, normalize: bool) -> Self {
        Self { normalize, ..self }
    }

    /// Set the fastembed cache directory (builder style)
    pub fn with_cache_dir(self, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: Some(cache_dir.into()),
            ..self
        }
    }

    /// Set query and document prefixes (builder style)
    pub fn with_prefixes(self, query: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            query_prefix: Some(query.into()),
            document_prefix: Some(document.into()),
            ..self
        }
    }

    /// Identifies the embedding space: two configs with the same id produce
    /// comparable vectors.
    pub fn model_id(&self) -> String {
        let norm = if self.normalize { "norm" } else { "raw" };
        match self.backend {
            EmbedBackend::Local => format!("fastembed:{}:{}", self.model_name, norm),
            EmbedBackend::Remote => format!(
                "remote:{}:{}:{}",
                self.remote.base_url.trim_end_matches('/'),
                self.remote.model,
                norm
            ),
            EmbedBackend::Hashing => format!("hashing:{}:{}", self.dimension, norm),
        }
    }

    /// Validate the settings of the selected backend.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch_size must be at least 1"));
        }
        match self.backend {
            EmbedBackend::Local => {
                crate::local::resolve_model(&self.model_name)?;
            }
            EmbedBackend::Remote => self.remote.validate()?,
            EmbedBackend::Hashing => {
                if self.dimension == 0 {
                    return Err(EmbedError::invalid_config(
                        "hashing backend dimension must be at least 1",
                    ));
                }
            }
        }
        tracing::debug!("Embedding configuration valid for: {}", self.model_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EmbedConfig::default();

        assert_eq!(config.backend, EmbedBackend::Local);
        assert_eq!(config.model_name, DEFAULT_LOCAL_MODEL);
        assert_eq!(config.batch_size, 32);
        assert!(config.normalize);
        assert_eq!(config.remote.base_url, DEFAULT_REMOTE_BASE_URL);
        assert_eq!(config.remote.model, DEFAULT_REMOTE_MODEL);
        assert_eq!(config.remote.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derive_builder_pattern() {
        let config = EmbedConfig::builder()
            .backend(EmbedBackend::Hashing)
            .dimension(64usize)
            .batch_size(8usize)
            .normalize(false)
            .build()
            .unwrap();

        assert_eq!(config.backend, EmbedBackend::Hashing);
        assert_eq!(config.dimension, 64);
        assert_eq!(config.batch_size, 8);
        assert!(!config.normalize);
        assert_eq!(config.model_name, DEFAULT_LOCAL_MODEL);
    }

    #[test]
    fn test_remote_requires_api_key() {
        let config = EmbedConfig::remote(RemoteConfig::default());
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());

        let remote = RemoteConfig::builder().api_key("sk-test").build().unwrap();
        assert!(EmbedConfig::remote(remote).validate().is_ok());
    }

    #[test]
    fn test_remote_rejects_bad_url() {
        let remote = RemoteConfig::builder()
            .api_key("sk-test")
            .base_url("ftp://example.com")
            .build()
            .unwrap();
        assert!(remote.validate().is_err());
    }

    #[test]
    fn test_endpoint_and_backoff() {
        let remote = RemoteConfig::builder()
            .base_url("http://localhost:8080/v1/")
            .initial_backoff_ms(100u64)
            .build()
            .unwrap();

        assert_eq!(remote.endpoint(), "http://localhost:8080/v1/embeddings");
        assert_eq!(remote.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(remote.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(remote.backoff_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_api_key_is_redacted() {
        let remote = RemoteConfig::builder().api_key("sk-secret").build().unwrap();

        assert!(!format!("{remote:?}").contains("sk-secret"));
        assert!(!serde_json::to_string(&remote).unwrap().contains("sk-secret"));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("local".parse::<EmbedBackend>().unwrap(), EmbedBackend::Local);
        assert_eq!("Remote".parse::<EmbedBackend>().unwrap(), EmbedBackend::Remote);
        assert_eq!("hashing".parse::<EmbedBackend>().unwrap(), EmbedBackend::Hashing);
        assert!("vendor-sdk".parse::<EmbedBackend>().is_err());
    }

    #[test]
    fn test_model_id_distinguishes_backends() {
        let local = EmbedConfig::local(DEFAULT_LOCAL_MODEL);
        let hashing = EmbedConfig::hashing(384);

        assert_ne!(local.model_id(), hashing.model_id());
        assert_eq!(hashing.model_id(), EmbedConfig::hashing(384).model_id());
        assert_ne!(hashing.model_id(), EmbedConfig::hashing(1536).model_id());
    }

    #[test]
    fn test_unknown_local_model_rejected() {
        let config = EmbedConfig::local("not-a-model");
        assert!(config.validate().unwrap_err().is_configuration());
    }
}
