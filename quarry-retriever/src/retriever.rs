//! Query-time retrieval over a built index.

use crate::error::{IndexError, Result, RetrieverError};
use crate::index::{IndexStats, Passage, RetrievalResult, VectorIndex};
use quarry_embed::{EmbedError, EmbeddingProvider};
use std::sync::Arc;

/// A built index together with the provider that embedded it.
///
/// Queries are embedded by the same provider instance, so query and document
/// vectors always share one embedding space.
#[derive(Debug)]
pub struct Retriever {
    provider: Arc<dyn EmbeddingProvider>,
    index: VectorIndex,
    model_id: String,
}

impl Retriever {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, index: VectorIndex) -> Self {
        let model_id = provider.model_id();
        Self {
            provider,
            index,
            model_id,
        }
    }

    /// The `k` chunks nearest to `query`, nearest first.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        if k == 0 {
            return Err(IndexError::InvalidK.into());
        }
        let Some(dimension) = self.index.dimension() else {
            tracing::debug!("Index is empty, skipping query embedding");
            return Ok(Vec::new());
        };

        let vector = self.provider.embed_query(query).await?;
        if vector.len() != dimension {
            tracing::warn!(
                "Query vector from {} has {} dimensions, index has {}",
                self.model_id,
                vector.len(),
                dimension
            );
            return Err(RetrieverError::Embedding(EmbedError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            }));
        }

        let results = self.index.query(&vector, k)?;
        tracing::debug!(
            "Query {:?} against {} returned {} results (k = {})",
            query,
            self.model_id,
            results.len(),
            k
        );
        Ok(results)
    }

    /// Like [`retrieve`](Self::retrieve), flattened to [`Passage`]s.
    pub async fn retrieve_passages(&self, question: &str, k: usize) -> Result<Vec<Passage>> {
        let results = self.retrieve(question, k).await?;
        Ok(results.into_iter().map(Passage::from).collect())
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Embedding space the index was built in.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexConfig;
    use async_trait::async_trait;
    use quarry_context::Chunk;
    use quarry_embed::EmbeddingResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    /// Maps a few known words to fixed vectors and counts query calls.
    #[derive(Debug, Default)]
    struct FixedProvider {
        dimension: usize,
        queries: AtomicUsize,
    }

    impl FixedProvider {
        fn vector_for(&self, text: &str) -> Vec<f32> {
            let mut v = vec![0.0; self.dimension];
            match text {
                "east" => v[0] = 1.0,
                "north" => v[1] = 1.0,
                _ => v[0] = 0.5,
            }
            v
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        async fn embed_documents(&self, texts: &[String]) -> quarry_embed::Result<EmbeddingResult> {
            Ok(EmbeddingResult::new(
                texts.iter().map(|t| self.vector_for(t)).collect(),
            ))
        }

        async fn embed_query(&self, text: &str) -> quarry_embed::Result<Vec<f32>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.vector_for(text))
        }

        fn embedding_dimension(&self) -> Option<usize> {
            Some(self.dimension)
        }

        fn provider_name(&self) -> &str {
            "fixed"
        }

        fn model_id(&self) -> String {
            format!("fixed:{}", self.dimension)
        }
    }

    fn chunk(content: &str, chunk_index: usize) -> Chunk {
        Chunk {
            content: content.to_string(),
            source: "compass.txt".to_string(),
            locator: None,
            chunk_index,
            span: 0..content.len(),
        }
    }

    fn retriever_with(provider: Arc<FixedProvider>, vectors: Vec<Vec<f32>>, chunks: Vec<Chunk>) -> Retriever {
        let index = VectorIndex::build(vectors, chunks, &IndexConfig::default()).unwrap();
        Retriever::new(provider, index)
    }

    #[tokio::test]
    async fn test_retrieve_ranks_nearest_first() {
        let provider = Arc::new(FixedProvider {
            dimension: 2,
            ..Default::default()
        });
        let retriever = retriever_with(
            provider,
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            vec![chunk("A", 0), chunk("B", 1)],
        );

        let results = retriever.retrieve("north", 2).await.unwrap();
        assert_eq!(results[0].chunk.content, "B");
        assert_eq!(results[1].chunk.content, "A");
        assert_eq!(retriever.model_id(), "fixed:2");

        let passages = retriever.retrieve_passages("east", 1).await.unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "A");
        assert_eq!(passages[0].source, "compass.txt");
    }

    #[tokio::test]
    async fn test_zero_k_rejected_before_embedding() {
        let provider = Arc::new(FixedProvider {
            dimension: 2,
            ..Default::default()
        });
        let retriever = retriever_with(
            Arc::clone(&provider),
            vec![vec![1.0, 0.0]],
            vec![chunk("A", 0)],
        );

        let err = retriever.retrieve("east", 0).await.unwrap_err();
        assert!(matches!(err, RetrieverError::Index(IndexError::InvalidK)));
        assert_eq!(provider.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_index_skips_provider() {
        let provider = Arc::new(FixedProvider {
            dimension: 2,
            ..Default::default()
        });
        let retriever = retriever_with(Arc::clone(&provider), vec![], vec![]);

        assert!(retriever.retrieve("anything", 5).await.unwrap().is_empty());
        assert_eq!(provider.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_queries_log_the_embedding_model() {
        let provider = Arc::new(FixedProvider {
            dimension: 2,
            ..Default::default()
        });
        let retriever = retriever_with(provider, vec![vec![1.0, 0.0]], vec![chunk("A", 0)]);

        retriever.retrieve("east", 1).await.unwrap();
        assert!(logs_contain("Query \"east\" against fixed:2 returned 1 results"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_query_dimension_mismatch_is_embedding_error() {
        let provider = Arc::new(FixedProvider {
            dimension: 1536,
            ..Default::default()
        });
        let retriever = retriever_with(provider, vec![vec![0.1; 384]], vec![chunk("A", 0)]);

        let err = retriever.retrieve("east", 1).await.unwrap_err();
        assert!(matches!(
            err,
            RetrieverError::Embedding(EmbedError::DimensionMismatch {
                expected: 384,
                actual: 1536
            })
        ));
        assert!(logs_contain("Query vector from fixed:1536 has 1536 dimensions, index has 384"));
    }
}
