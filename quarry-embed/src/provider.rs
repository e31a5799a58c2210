//! The embedding provider abstraction shared by all backends

use crate::config::{EmbedBackend, EmbedConfig};
use crate::error::{EmbedError, Result};
use crate::hashing::HashingEmbedProvider;
use crate::local::FastEmbedProvider;
use crate::remote::RemoteEmbedProvider;
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};

/// Result of embedding generation
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result.
    ///
    /// The dimension is inferred from the first embedding vector and is 0 for
    /// an empty result.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Returns the number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that map text to fixed-dimension vectors.
///
/// Documents and queries must be embedded by the same provider instance so
/// that both live in the same metric space.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Embed a batch of document chunks, preserving input order
    async fn embed_documents(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Embed a single query
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimension of the produced vectors, once known
    fn embedding_dimension(&self) -> Option<usize>;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    /// Identifier of the embedding space (backend, model, normalization)
    fn model_id(&self) -> String;
}

/// Construct the provider selected by `config.backend`.
///
/// The configuration is validated first, so a missing API key or an unknown
/// model fails here without touching the network.
pub async fn create_provider(config: &EmbedConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    config.validate()?;
    tracing::info!(
        "Creating {} embedding provider ({})",
        config.backend,
        config.model_id()
    );

    let provider: Arc<dyn EmbeddingProvider> = match config.backend {
        EmbedBackend::Local => Arc::new(FastEmbedProvider::create(config.clone()).await?),
        EmbedBackend::Remote => Arc::new(RemoteEmbedProvider::new(config.clone())?),
        EmbedBackend::Hashing => Arc::new(HashingEmbedProvider::new(config.clone())?),
    };
    Ok(provider)
}

/// Records the first dimension a provider produced and rejects any other.
#[derive(Debug, Default)]
pub struct DimensionGuard {
    dimension: OnceLock<usize>,
}

impl DimensionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard that starts out with a known dimension.
    pub fn with_dimension(dimension: usize) -> Self {
        let guard = Self::default();
        let _ = guard.dimension.set(dimension);
        guard
    }

    pub fn get(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    /// Check every vector against the established dimension. The first
    /// successful call establishes it, and only once the whole batch agrees.
    pub fn check(&self, vectors: &[Vec<f32>]) -> Result<()> {
        let Some(first) = vectors.first() else {
            return Ok(());
        };
        if first.is_empty() {
            return Err(EmbedError::malformed("received an empty embedding vector"));
        }

        let expected = self.get().unwrap_or(first.len());
        if let Some(v) = vectors.iter().find(|v| v.len() != expected) {
            return Err(EmbedError::DimensionMismatch {
                expected,
                actual: v.len(),
            });
        }

        let established = *self.dimension.get_or_init(|| {
            tracing::debug!("Established embedding dimension: {}", expected);
            expected
        });
        if established != expected {
            return Err(EmbedError::DimensionMismatch {
                expected: established,
                actual: expected,
            });
        }
        Ok(())
    }
}

/// L2-normalize a vector in place; zero vectors are left untouched.
pub fn normalize_in_place(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Prepend an optional model-specific prefix.
pub(crate) fn with_prefix(prefix: Option<&str>, text: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}{text}"),
        None => text.to_string(),
    }
}
