//! Caller-held retrieval state across uploads.
//!
//! A [`RetrievalSession`] owns the current [`Retriever`] and replaces it
//! wholesale on every rebuild. Queries take a snapshot of the current
//! retriever and run without holding the lock, so they keep answering from
//! the previous index while a rebuild is in progress.

use crate::config::RetrieverConfig;
use crate::error::{IndexError, Result, RetrieverError};
use crate::index::{IndexStats, Passage, RetrievalResult};
use crate::loader::UploadedFile;
use crate::pipeline::{BuildReport, IndexBuilder};
use crate::retriever::Retriever;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug)]
pub struct RetrievalSession {
    builder: IndexBuilder,
    default_k: usize,
    current: RwLock<Option<Arc<Retriever>>>,
    /// Serializes rebuilds so the last one to start is the last one installed
    rebuild_lock: Mutex<()>,
}

impl RetrievalSession {
    pub fn new(builder: IndexBuilder, default_k: usize) -> Self {
        Self {
            builder,
            default_k,
            current: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Validate `config` and construct its embedding provider.
    pub async fn from_config(config: &RetrieverConfig) -> Result<Self> {
        config.validate()?;
        let builder = config.index_builder().await?;
        Ok(Self::new(builder, config.default_k))
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Build a new index from `files` and install it.
    pub async fn rebuild(&self, files: Vec<UploadedFile>) -> Result<BuildReport> {
        self.rebuild_with_cancellation(files, &CancellationToken::new())
            .await
    }

    /// Build a new index and install it unless the build fails or `cancel`
    /// fires first. In both of those cases the previous index stays active.
    pub async fn rebuild_with_cancellation(
        &self,
        files: Vec<UploadedFile>,
        cancel: &CancellationToken,
    ) -> Result<BuildReport> {
        let _guard = self.rebuild_lock.lock().await;

        let (retriever, report) = match self.builder.build_with_cancellation(files, cancel).await {
            Ok(built) => built,
            Err(e) => {
                warn!("Rebuild failed, keeping the previous index: {}", e);
                return Err(e);
            }
        };

        // A cancellation that lands after the build finished still wins.
        if cancel.is_cancelled() {
            info!("Rebuild cancelled before install, keeping the previous index");
            return Err(RetrieverError::Cancelled);
        }

        let previous = self.install(retriever).await;
        info!(
            "Installed index with {} chunks (replaced {})",
            report.chunks,
            previous.map_or(0, |p| p.index().len())
        );
        Ok(report)
    }

    /// Swap in `retriever`, returning the one it replaced.
    pub async fn install(&self, retriever: Retriever) -> Option<Arc<Retriever>> {
        let mut current = self.current.write().await;
        current.replace(Arc::new(retriever))
    }

    /// Drop the installed index.
    pub async fn clear(&self) -> Option<Arc<Retriever>> {
        self.current.write().await.take()
    }

    /// Snapshot of the installed retriever.
    pub async fn current(&self) -> Option<Arc<Retriever>> {
        self.current.read().await.clone()
    }

    async fn require_current(&self) -> Result<Arc<Retriever>> {
        self.current().await.ok_or_else(|| IndexError::NotBuilt.into())
    }

    /// Top `k` chunks from the installed index.
    ///
    /// Fails with [`IndexError::NotBuilt`] before the first successful build.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        self.require_current().await?.retrieve(query, k).await
    }

    pub async fn retrieve_passages(&self, question: &str, k: usize) -> Result<Vec<Passage>> {
        self.require_current()
            .await?
            .retrieve_passages(question, k)
            .await
    }

    /// [`retrieve_passages`](Self::retrieve_passages) with the configured `k`.
    pub async fn ask(&self, question: &str) -> Result<Vec<Passage>> {
        self.retrieve_passages(question, self.default_k).await
    }

    pub async fn stats(&self) -> Option<IndexStats> {
        self.current().await.map(|r| r.stats())
    }
}
