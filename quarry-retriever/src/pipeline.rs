//! Build pipeline: uploaded files to a queryable [`Retriever`].
//!
//! ```text
//! UploadedFile → Loader → TextUnit → Chunker → Chunk → EmbeddingProvider → VectorIndex
//! ```
//!
//! Stages run one after another and nothing is published until every stage
//! succeeded, so a failed or cancelled build never yields a partial index.
//! Loading and index construction are CPU-bound and run on the blocking pool.

use crate::error::{LoadError, Result, RetrieverError};
use crate::index::{IndexConfig, VectorIndex};
use crate::loader::{FailurePolicy, LoadedDocument, UploadedFile, load_batch};
use crate::retriever::Retriever;
use quarry_context::{ChunkerConfig, split};
use quarry_embed::EmbeddingProvider;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a build consumed and produced.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub documents: Vec<LoadedDocument>,
    /// Files skipped under [`FailurePolicy::SkipAndReport`]
    pub failures: Vec<LoadError>,
    pub duplicates: Vec<String>,
    pub units: usize,
    pub chunks: usize,
    pub elapsed: Duration,
}

/// Builds a [`Retriever`] from a batch of uploaded files.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    provider: Arc<dyn EmbeddingProvider>,
    chunking: ChunkerConfig,
    index: IndexConfig,
    failure_policy: FailurePolicy,
}

impl IndexBuilder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            chunking: ChunkerConfig::default(),
            index: IndexConfig::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkerConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_index_config(mut self, index: IndexConfig) -> Self {
        self.index = index;
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Run the whole pipeline over `files`.
    pub async fn build(&self, files: Vec<UploadedFile>) -> Result<(Retriever, BuildReport)> {
        self.build_with_cancellation(files, &CancellationToken::new())
            .await
    }

    /// Like [`build`](Self::build), abandoned as soon as `cancel` fires.
    ///
    /// Cancellation drops the in-flight stage, including pending embedding
    /// requests, and returns [`RetrieverError::Cancelled`].
    pub async fn build_with_cancellation(
        &self,
        files: Vec<UploadedFile>,
        cancel: &CancellationToken,
    ) -> Result<(Retriever, BuildReport)> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Index build cancelled");
                Err(RetrieverError::Cancelled)
            }
            result = self.run(files) => result,
        }
    }

    async fn run(&self, files: Vec<UploadedFile>) -> Result<(Retriever, BuildReport)> {
        let started = Instant::now();
        self.chunking.validate()?;
        self.index.validate()?;

        info!("Building index from {} uploaded files", files.len());
        let policy = self.failure_policy;
        let loaded = tokio::task::spawn_blocking(move || load_batch(&files, policy)).await??;

        let chunks = split(&loaded.units, &self.chunking)?;
        info!(
            "Split {} text units into {} chunks (size {}, overlap {})",
            loaded.units.len(),
            chunks.len(),
            self.chunking.chunk_size,
            self.chunking.chunk_overlap
        );

        let vectors = if chunks.is_empty() {
            warn!("No text to index; building an empty index");
            Vec::new()
        } else {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let result = self.provider.embed_documents(&texts).await?;
            debug!(
                "Embedded {} chunks with {} (dimension {})",
                result.len(),
                self.provider.provider_name(),
                result.dimension
            );
            result.embeddings
        };

        let chunk_count = chunks.len();
        let index_config = self.index;
        let index =
            tokio::task::spawn_blocking(move || VectorIndex::build(vectors, chunks, &index_config))
                .await??;

        let report = BuildReport {
            documents: loaded.documents,
            failures: loaded.failures,
            duplicates: loaded.duplicates,
            units: loaded.units.len(),
            chunks: chunk_count,
            elapsed: started.elapsed(),
        };
        info!(
            "Index built: {} documents, {} chunks in {:.2?}",
            report.documents.len(),
            report.chunks,
            report.elapsed
        );

        Ok((Retriever::new(Arc::clone(&self.provider), index), report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_embed::{EmbedConfig, HashingEmbedProvider};

    fn hashing_builder() -> IndexBuilder {
        let provider = HashingEmbedProvider::new(EmbedConfig::hashing(64)).unwrap();
        IndexBuilder::new(Arc::new(provider))
    }

    #[tokio::test]
    async fn test_builds_over_text_files() {
        let files = vec![
            UploadedFile::new(
                b"The quarterly revenue report shows growth.".to_vec(),
                "finance.txt",
            ),
            UploadedFile::new(b"Sourdough needs a long fermentation.".to_vec(), "bread.txt"),
        ];

        let (retriever, report) = hashing_builder().build(files).await.unwrap();
        assert_eq!(report.documents.len(), 2);
        assert_eq!(report.chunks, 2);
        assert_eq!(retriever.index().len(), 2);

        let results = retriever.retrieve("quarterly revenue", 1).await.unwrap();
        assert_eq!(results[0].chunk.source, "finance.txt");
    }

    #[tokio::test]
    async fn test_invalid_chunking_fails_before_loading() {
        let builder = hashing_builder().with_chunking(ChunkerConfig {
            chunk_size: 100,
            chunk_overlap: 100,
        });
        let err = builder
            .build(vec![UploadedFile::new(b"text".to_vec(), "a.txt")])
            .await
            .unwrap_err();
        assert!(matches!(err, RetrieverError::Chunk(_)));
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_build() {
        let builder = hashing_builder().with_failure_policy(FailurePolicy::FailFast);
        let err = builder
            .build(vec![
                UploadedFile::new(b"fine".to_vec(), "a.txt"),
                UploadedFile::new(b"garbage".to_vec(), "b.pdf"),
            ])
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = hashing_builder()
            .build_with_cancellation(vec![UploadedFile::new(b"x".to_vec(), "a.txt")], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RetrieverError::Cancelled));
    }
}
