//! Error types for loading, indexing and retrieval

use quarry_context::ChunkError;
use quarry_embed::EmbedError;

/// Why a single document could not be turned into text units.
#[derive(Debug, thiserror::Error)]
pub enum LoadErrorKind {
    #[error("malformed PDF: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("malformed DOCX archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("malformed DOCX markup: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("DOCX archive has no word/document.xml")]
    MissingDocumentXml,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A document that could not be loaded. Recoverable: other files of the same
/// upload are unaffected.
#[derive(Debug, thiserror::Error)]
#[error("failed to load {file_name}: {kind}")]
pub struct LoadError {
    pub file_name: String,
    #[source]
    pub kind: LoadErrorKind,
}

impl LoadError {
    pub fn new(file_name: impl Into<String>, kind: impl Into<LoadErrorKind>) -> Self {
        Self {
            file_name: file_name.into(),
            kind: kind.into(),
        }
    }
}

/// Errors raised while building or querying a [`VectorIndex`](crate::index::VectorIndex).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    #[error("k must be at least 1")]
    InvalidK,

    #[error("got {vectors} vectors for {chunks} chunks")]
    LengthMismatch { vectors: usize, chunks: usize },

    #[error("vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector {position} contains a non-finite component")]
    NonFiniteVector { position: usize },

    #[error("invalid index configuration: {0}")]
    InvalidConfig(String),

    #[error("no documents indexed yet")]
    NotBuilt,
}

/// Top-level error for the retrieval pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("index build was cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl RetrieverError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// True for failures confined to one input file; the rest of an upload can
    /// still be indexed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Load(_))
    }
}

pub type Result<T> = std::result::Result<T, RetrieverError>;
