//! Offline feature-hashing embedder.
//!
//! Each lowercase alphanumeric token is hashed with FNV-1a into one of
//! `dimension` buckets with a hash-derived sign. No model is required and the
//! output is stable across runs and platforms, which makes this backend the
//! choice for tests and air-gapped setups. Texts sharing vocabulary land close
//! together; there is no semantic generalization beyond that.

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult, normalize_in_place, with_prefix};
use async_trait::async_trait;
use fnv::FnvHasher;
use std::hash::Hasher;

#[derive(Debug, Clone)]
pub struct HashingEmbedProvider {
    config: EmbedConfig,
}

impl HashingEmbedProvider {
    pub fn new(config: EmbedConfig) -> Result<Self> {
        if config.dimension == 0 {
            return Err(EmbedError::invalid_config(
                "hashing backend dimension must be at least 1",
            ));
        }
        Ok(Self { config })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let dimension = self.config.dimension;
        let mut vector = vec![0.0f32; dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = FnvHasher::default();
            hasher.write(token.to_lowercase().as_bytes());
            let hash = hasher.finish();

            let bucket = (hash % dimension as u64) as usize;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        if self.config.normalize {
            normalize_in_place(&mut vector);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedProvider {
    async fn embed_documents(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let prefix = self.config.document_prefix.as_deref();
        let embeddings = texts
            .iter()
            .map(|t| self.embed_one(&with_prefix(prefix, t)))
            .collect();
        Ok(EmbeddingResult::new(embeddings))
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(&with_prefix(self.config.query_prefix.as_deref(), text)))
    }

    fn embedding_dimension(&self) -> Option<usize> {
        Some(self.config.dimension)
    }

    fn provider_name(&self) -> &str {
        "hashing"
    }

    fn model_id(&self) -> String {
        self.config.model_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_deterministic_and_normalized() {
        let provider = HashingEmbedProvider::new(EmbedConfig::hashing(64)).unwrap();

        let a = provider.embed_query("Revenue grew in Q3").await.unwrap();
        let b = provider.embed_query("revenue GREW in q3!").await.unwrap();

        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_is_closer() {
        let provider = HashingEmbedProvider::new(EmbedConfig::hashing(384)).unwrap();
        let docs = vec![
            "the quarterly revenue report for the finance team".to_string(),
            "a recipe for sourdough bread with a crisp crust".to_string(),
        ];
        let result = provider.embed_documents(&docs).await.unwrap();
        let query = provider.embed_query("quarterly revenue").await.unwrap();

        assert!(cosine(&query, &result.embeddings[0]) > cosine(&query, &result.embeddings[1]));
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let provider = HashingEmbedProvider::new(EmbedConfig::hashing(8)).unwrap();
        let vector = provider.embed_query("  ").await.unwrap();
        assert_eq!(vector, vec![0.0; 8]);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(HashingEmbedProvider::new(EmbedConfig::hashing(0)).is_err());
    }
}
