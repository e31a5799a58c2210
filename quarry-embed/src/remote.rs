//! Embedding through an OpenAI-compatible `/embeddings` HTTP endpoint.
//!
//! Inputs are split into batches of `batch_size`; up to
//! `max_concurrent_requests` batches are in flight at once and results are
//! reassembled in input order. Transport errors, `429` and `5xx` responses are
//! retried with exponential backoff; any other status fails immediately.

use crate::config::{EmbedConfig, RemoteConfig};
use crate::error::{EmbedError, Result};
use crate::provider::{
    DimensionGuard, EmbeddingProvider, EmbeddingResult, normalize_in_place, with_prefix,
};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Longest error body kept in [`EmbedError::Http`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Failure of a single attempt, before retry classification.
enum AttemptError {
    Status(StatusCode, String),
    Transport(reqwest::Error),
    Fatal(EmbedError),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Status(status, _) => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::Transport(_) => true,
            Self::Fatal(_) => false,
        }
    }

    fn into_error(self, attempts: usize) -> EmbedError {
        match self {
            Self::Status(status, body) => EmbedError::Http {
                status: status.as_u16(),
                body,
                attempts,
            },
            Self::Transport(source) => EmbedError::Transport { attempts, source },
            Self::Fatal(err) => err,
        }
    }
}

/// Provider backed by a remote embeddings endpoint.
#[derive(Debug)]
pub struct RemoteEmbedProvider {
    config: EmbedConfig,
    client: reqwest::Client,
    api_key: String,
    dimension: DimensionGuard,
}

impl RemoteEmbedProvider {
    /// Builds the HTTP client. Fails on invalid settings without any I/O.
    pub fn new(config: EmbedConfig) -> Result<Self> {
        config.remote.validate()?;
        let api_key = config.remote.api_key.clone().unwrap_or_default();

        let client = reqwest::Client::builder()
            .timeout(config.remote.timeout())
            .build()
            .map_err(|e| EmbedError::invalid_config(format!("cannot build HTTP client: {e}")))?;

        tracing::info!(
            "Remote embedding provider for {} (model {})",
            config.remote.endpoint(),
            config.remote.model
        );
        Ok(Self {
            config,
            client,
            api_key,
            dimension: DimensionGuard::new(),
        })
    }

    fn remote(&self) -> &RemoteConfig {
        &self.config.remote
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let max_attempts = self.remote().max_attempts;
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.try_once(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.remote().backoff_for_attempt(attempt);
                    tracing::warn!(
                        "Embedding request attempt {}/{} failed ({}), retrying in {:?}",
                        attempt,
                        max_attempts,
                        describe(&err),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into_error(attempt)),
            }
        }
    }

    async fn try_once(&self, batch: &[String]) -> std::result::Result<Vec<Vec<f32>>, AttemptError> {
        let request = EmbeddingRequest {
            model: &self.remote().model,
            input: batch,
        };

        let response = self
            .client
            .post(self.remote().endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(AttemptError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|&i| body.is_char_boundary(i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(AttemptError::Status(status, body));
        }

        let bytes = response.bytes().await.map_err(AttemptError::Transport)?;
        let parsed: EmbeddingResponse = serde_json::from_slice(&bytes).map_err(|e| {
            AttemptError::Fatal(EmbedError::malformed(format!("invalid JSON body: {e}")))
        })?;
        order_embeddings(parsed.data, batch.len()).map_err(AttemptError::Fatal)
    }
}

fn describe(err: &AttemptError) -> String {
    match err {
        AttemptError::Status(status, _) => format!("HTTP {status}"),
        AttemptError::Transport(e) => e.to_string(),
        AttemptError::Fatal(e) => e.to_string(),
    }
}

/// Put items back in request order; when the endpoint reports `index`, it wins
/// over response position.
fn order_embeddings(mut items: Vec<EmbeddingItem>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if items.len() != expected {
        return Err(EmbedError::malformed(format!(
            "expected {expected} embeddings, got {}",
            items.len()
        )));
    }

    if items.iter().all(|item| item.index.is_some()) {
        items.sort_by_key(|item| item.index);
        let indices_valid = items
            .iter()
            .enumerate()
            .all(|(position, item)| item.index == Some(position));
        if !indices_valid {
            return Err(EmbedError::malformed(
                "response indices do not cover the request",
            ));
        }
    }

    Ok(items.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedProvider {
    async fn embed_documents(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let prefix = self.config.document_prefix.as_deref();
        let prefixed: Vec<String> = texts.iter().map(|t| with_prefix(prefix, t)).collect();
        let batches: Vec<Vec<String>> = prefixed
            .chunks(self.config.batch_size.max(1))
            .map(<[String]>::to_vec)
            .collect();
        tracing::debug!(
            "Embedding {} texts in {} remote batch(es)",
            texts.len(),
            batches.len()
        );

        let per_batch: Vec<Vec<Vec<f32>>> = stream::iter(batches)
            .map(|batch| async move { self.embed_batch(&batch).await })
            .buffered(self.remote().max_concurrent_requests.max(1))
            .try_collect()
            .await?;

        let mut embeddings = Vec::with_capacity(texts.len());
        for mut vectors in per_batch {
            self.dimension.check(&vectors)?;
            if self.config.normalize {
                vectors.iter_mut().for_each(|v| normalize_in_place(v));
            }
            embeddings.extend(vectors);
        }
        Ok(EmbeddingResult::new(embeddings))
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let prefixed = vec![with_prefix(self.config.query_prefix.as_deref(), text)];
        let mut vectors = self.embed_batch(&prefixed).await?;
        self.dimension.check(&vectors)?;
        let mut vector = vectors
            .pop()
            .ok_or_else(|| EmbedError::malformed("no embedding returned for query"))?;
        if self.config.normalize {
            normalize_in_place(&mut vector);
        }
        Ok(vector)
    }

    fn embedding_dimension(&self) -> Option<usize> {
        self.dimension.get()
    }

    fn provider_name(&self) -> &str {
        "remote"
    }

    fn model_id(&self) -> String {
        self.config.model_id()
    }
}
