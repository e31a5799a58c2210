//! quarry-retriever: document loading, vector indexing and retrieval
//!
//! Turns uploaded PDF, DOCX and plain-text files into an in-memory vector
//! index and answers "which passages are most relevant to this question?".
//!
//! ## Key Modules
//!
//! - **[`loader`]**: format detection and text extraction into [`TextUnit`](quarry_context::TextUnit)s
//! - **[`index`]**: exact and IVF-flat nearest-neighbour search under L2 or cosine distance
//! - **[`pipeline`]**: [`IndexBuilder`] running load, chunk, embed and index as one build
//! - **[`retriever`]**: query embedding and ranking over a built index
//! - **[`session`]**: caller-held current index with atomic rebuilds and cancellation
//! - **[`config`]**: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quarry_retriever::{RetrievalSession, RetrieverConfig, UploadedFile};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RetrieverConfig::from_env()?;
//! let session = RetrievalSession::from_config(&config).await?;
//!
//! let report = session
//!     .rebuild(vec![UploadedFile::from_path("handbook.pdf").await?])
//!     .await?;
//! println!("indexed {} chunks", report.chunks);
//!
//! for passage in session.retrieve_passages("How many vacation days?", 4).await? {
//!     println!("{} (page {:?}): {}", passage.source, passage.locator, passage.text);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! UploadedFile → Loader → Chunker → EmbeddingProvider → VectorIndex
//!                                          ↑                 ↓
//!                         question → Retriever ← RetrievalSession
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod retriever;
pub mod session;

pub use config::{DEFAULT_TOP_K, RetrieverConfig};
pub use error::{IndexError, LoadError, LoadErrorKind, Result, RetrieverError};
pub use index::{
    DistanceMetric, IndexConfig, IndexStats, Passage, RetrievalResult, SearchStrategy, VectorIndex,
};
pub use loader::{
    DocumentFormat, FailurePolicy, LoadReport, LoadedDocument, UploadedFile, load, load_batch,
};
pub use pipeline::{BuildReport, IndexBuilder};
pub use retriever::Retriever;
pub use session::RetrievalSession;
