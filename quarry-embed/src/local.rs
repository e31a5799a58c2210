//! Local embedding through fastembed's ONNX runtime.
//!
//! Loaded models are kept in a process-wide cache keyed by model name and
//! cache directory, so building several providers for the same model only
//! pays the load cost once.

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use crate::provider::{
    DimensionGuard, EmbeddingProvider, EmbeddingResult, normalize_in_place, with_prefix,
};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Type alias for cached model entries (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Global cache for initialized embedding models to avoid reloading
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn model_cache() -> MutexGuard<'static, HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Map a model name to a built-in fastembed model.
///
/// Both the short name (`all-MiniLM-L6-v2`) and the Hugging Face repository
/// name (`sentence-transformers/all-MiniLM-L6-v2`) are accepted.
pub fn resolve_model(name: &str) -> Result<EmbeddingModel> {
    let short = name.rsplit('/').next().unwrap_or(name).to_lowercase();
    let model = match short.as_str() {
        "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
        "all-minilm-l12-v2" => EmbeddingModel::AllMiniLML12V2,
        "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
        "nomic-embed-text-v1.5" => EmbeddingModel::NomicEmbedTextV15,
        "multilingual-e5-small" => EmbeddingModel::MultilingualE5Small,
        _ => {
            return Err(EmbedError::invalid_config(format!(
                "unknown local embedding model: {name:?}"
            )));
        }
    };
    Ok(model)
}

/// FastEmbed-based embedding provider using real ONNX models
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: Arc<DimensionGuard>,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_name", &self.config.model_name)
            .field("loaded", &self.model.is_some())
            .field("dimension", &self.dimension.get())
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates an uninitialized provider; call [`initialize`](Self::initialize)
    /// before embedding.
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            model: None,
            dimension: Arc::new(DimensionGuard::new()),
        }
    }

    /// Loads the model, downloading it on first use, and probes its dimension.
    pub async fn initialize(&mut self) -> Result<()> {
        tracing::info!(
            "Initializing FastEmbed provider for model: {}",
            self.config.model_name
        );

        let cache_key = self.cache_key();
        let cached = model_cache()
            .get(&cache_key)
            .map(|(model, dim)| (Arc::clone(model), *dim));

        let (model, dimension) = match cached {
            Some(entry) => {
                tracing::info!("Using cached model for: {}", self.config.model_name);
                entry
            }
            None => {
                let (model, dimension) = self.load_model().await?;
                let model = Arc::new(Mutex::new(model));
                model_cache().insert(cache_key, (Arc::clone(&model), dimension));
                (model, dimension)
            }
        };

        self.model = Some(model);
        self.dimension = Arc::new(DimensionGuard::with_dimension(dimension));
        self.validate_model().await
    }

    /// Creates and initializes a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    fn cache_key(&self) -> String {
        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(self.config.model_name.to_lowercase().as_bytes());
        if let Some(dir) = &self.config.cache_dir {
            hasher.write(dir.to_string_lossy().as_bytes());
        }
        format!("v1:{:x}", hasher.finish())
    }

    async fn load_model(&self) -> Result<(TextEmbedding, usize)> {
        let model_kind = resolve_model(&self.config.model_name)?;
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
            tracing::info!("Loading embedding model: {}", config.model_name);

            let mut init_options =
                InitOptions::new(model_kind).with_show_download_progress(false);
            if let Some(dir) = config.cache_dir.clone() {
                init_options = init_options.with_cache_dir(dir);
            }

            let mut model = TextEmbedding::try_new(init_options)
                .map_err(|e| EmbedError::ModelInitialization { source: e.into() })?;

            let probe = model
                .embed(vec!["dimension probe".to_string()], None)
                .map_err(|e| EmbedError::ModelInitialization { source: e.into() })?;
            let dimension = probe
                .first()
                .map(|emb| emb.len())
                .filter(|&len| len > 0)
                .ok_or_else(|| EmbedError::malformed("model produced an empty probe embedding"))?;

            tracing::info!("Model loaded successfully. Dimension: {}", dimension);
            Ok((model, dimension))
        })
        .await?
    }

    /// Validate that the model is working correctly
    async fn validate_model(&self) -> Result<()> {
        let embedding = self.run_batch(vec!["validation test".to_string()]).await?;
        let Some(embedding) = embedding.first() else {
            return Err(EmbedError::malformed(
                "model validation failed: no embeddings generated",
            ));
        };

        self.dimension.check(std::slice::from_ref(embedding))?;
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(EmbedError::malformed(
                "model validation failed: non-finite values in embedding",
            ));
        }

        tracing::debug!("Model validation passed for: {}", self.config.model_name);
        Ok(())
    }

    async fn run_batch(&self, batch: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = self.model.as_ref().ok_or_else(|| {
            EmbedError::invalid_config("Model not initialized. Call initialize() first.")
        })?;
        let model = Arc::clone(model);

        tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            tracing::debug!("Processing batch of {} texts", batch.len());
            let mut guard = model.lock().unwrap_or_else(|p| p.into_inner());
            guard
                .embed(batch, None)
                .map_err(|e| EmbedError::EmbeddingGeneration { source: e.into() })
        })
        .await?
    }

    async fn embed_prefixed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let mut embeddings = self.run_batch(batch.to_vec()).await?;
            if embeddings.len() != batch.len() {
                return Err(EmbedError::malformed(format!(
                    "model returned {} embeddings for {} texts",
                    embeddings.len(),
                    batch.len()
                )));
            }
            self.dimension.check(&embeddings)?;
            if self.config.normalize {
                embeddings.iter_mut().for_each(|e| normalize_in_place(e));
            }
            all_embeddings.extend(embeddings);
        }
        Ok(all_embeddings)
    }

    /// Clears the global model cache.
    pub fn clear_cache() {
        model_cache().clear();
        tracing::info!("Model cache cleared");
    }

    /// Returns the number of cached models.
    pub fn cache_size() -> usize {
        model_cache().len()
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_documents(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        tracing::debug!("Generating embeddings for {} texts", texts.len());
        let prefix = self.config.document_prefix.as_deref();
        let prefixed = texts.iter().map(|t| with_prefix(prefix, t)).collect();
        let embeddings = self.embed_prefixed(prefixed).await?;
        tracing::debug!("Generated {} embeddings", embeddings.len());
        Ok(EmbeddingResult::new(embeddings))
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let prefixed = with_prefix(self.config.query_prefix.as_deref(), text);
        self.embed_prefixed(vec![prefixed])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::malformed("no embedding generated for query"))
    }

    fn embedding_dimension(&self) -> Option<usize> {
        self.dimension.get()
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }

    fn model_id(&self) -> String {
        self.config.model_id()
    }
}
