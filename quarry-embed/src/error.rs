//! Error types for the embedding system

/// Result type for embedding operations.
///
/// This is a convenience type alias that uses [`EmbedError`] as the error type.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// Every variant is fatal to the operation that raised it (an index build or a
/// query) but never to state that was already built: providers hold no
/// partially-written results.
///
/// # Error Categories
///
/// - **Configuration Errors**: invalid settings or missing credentials, raised
///   before any I/O
/// - **Initialization Errors**: failures while loading a local model
/// - **Remote Errors**: HTTP failures after retries were exhausted, transport
///   errors and malformed responses
/// - **Consistency Errors**: vectors whose dimension differs from the one the
///   provider established
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Error when the provider configuration is invalid
    #[error("Invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// Error during model initialization
    #[error("Model initialization failed: {source}")]
    ModelInitialization {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error during local embedding generation
    #[error("Embedding generation failed: {source}")]
    EmbeddingGeneration {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The remote endpoint answered with a non-success status after all retries
    #[error("Embedding endpoint returned HTTP {status} after {attempts} attempt(s): {body}")]
    Http {
        status: u16,
        body: String,
        attempts: usize,
    },

    /// The request never produced a response (connect failure, timeout, ...)
    #[error("Embedding request failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered 2xx but the payload is unusable
    #[error("Malformed embedding response: {message}")]
    MalformedResponse { message: String },

    /// A vector does not have the dimension established for this provider or index
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Async task join errors
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// IO errors
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Generic errors from other libraries
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Create a model initialization error from any error type.
    pub fn model_init<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ModelInitialization {
            source: Box::new(source),
        }
    }

    /// Create an embedding generation error from any error type.
    pub fn embedding_gen<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::EmbeddingGeneration {
            source: Box::new(source),
        }
    }

    /// Create an invalid configuration error with a custom message.
    ///
    /// Used for configuration validation errors such as a missing API key,
    /// an unknown model name or a zero batch size.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a malformed response error with a custom message.
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    /// Returns true for configuration problems detected before any I/O.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. })
    }
}
