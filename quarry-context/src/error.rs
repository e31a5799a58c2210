//! Error types for chunking

/// Result type for chunking operations.
pub type Result<T> = std::result::Result<T, ChunkError>;

/// Errors raised before any splitting happens.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// Chunk size or overlap is unusable
    #[error("Invalid chunker configuration: {message}")]
    InvalidConfig { message: String },

    /// A custom delimiter pattern failed to compile
    #[error("Invalid delimiter pattern {pattern:?}: {source}")]
    InvalidDelimiter {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl ChunkError {
    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
