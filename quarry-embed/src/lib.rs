//! # quarry-embed
//!
//! Text embedding behind one async interface, with three interchangeable
//! backends:
//!
//! - **Local**: ONNX models run in-process through FastEmbed, cached globally
//!   so repeated construction does not reload the model
//! - **Remote**: any OpenAI-compatible `/embeddings` endpoint, with batching,
//!   bounded concurrency and retry with backoff
//! - **Hashing**: a deterministic feature-hashing embedder that needs no model,
//!   used for tests and offline setups
//!
//! ## Quick Start
//!
//! ```no_run
//! use quarry_embed::{EmbedConfig, create_provider};
//!
//! # async fn example() -> quarry_embed::Result<()> {
//! let provider = create_provider(&EmbedConfig::local("all-MiniLM-L6-v2")).await?;
//!
//! let texts = vec!["Hello world".to_string(), "How are you?".to_string()];
//! let result = provider.embed_documents(&texts).await?;
//! let query = provider.embed_query("greeting").await?;
//!
//! assert_eq!(query.len(), result.dimension);
//! # Ok(())
//! # }
//! ```
//!
//! ## Consistency
//!
//! A provider fixes its output dimension on the first successful call and
//! rejects any later vector of a different size with
//! [`EmbedError::DimensionMismatch`]. [`EmbeddingProvider::model_id`] names the
//! embedding space so that an index can refuse vectors from a different one.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] using the crate's [`EmbedError`] type.
//! Configuration problems such as a missing API key are reported by
//! [`create_provider`] before any network or disk access.

pub mod config;
pub mod error;
pub mod hashing;
pub mod local;
pub mod provider;
pub mod remote;

// Re-export main types for easy access
pub use config::{
    DEFAULT_HASHING_DIMENSION, DEFAULT_LOCAL_MODEL, DEFAULT_REMOTE_BASE_URL, DEFAULT_REMOTE_MODEL,
    EmbedBackend, EmbedConfig, RemoteConfig,
};
pub use error::{EmbedError, Result};
pub use hashing::HashingEmbedProvider;
pub use local::FastEmbedProvider;
pub use provider::{DimensionGuard, EmbeddingProvider, EmbeddingResult, create_provider};
pub use remote::RemoteEmbedProvider;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_documents_and_queries_share_a_space() {
        let config = EmbedConfig::hashing(32).with_prefixes("query: ", "passage: ");
        let provider = create_provider(&config).await.unwrap();

        let docs = provider
            .embed_documents(&["alpha beta".to_string()])
            .await
            .unwrap();
        let query = provider.embed_query("alpha beta").await.unwrap();

        assert_eq!(docs.dimension, query.len());
        assert_eq!(provider.model_id(), config.model_id());
    }
}
