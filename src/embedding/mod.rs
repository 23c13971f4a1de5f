//! Embedding backends.
//!
//! Concrete [`Embedder`] implementations:
//! - **[`OpenAIEmbedder`]**: `POST /v1/embeddings` with batching and retry.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **[`LocalEmbedder`]**: in-process fastembed models (feature `local-embeddings`).
//!
//! Use [`create_embedder`] to build the one named by `[embedding].provider`.
//!
//! # Retry Strategy
//!
//! HTTP backends retry transient failures with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff 1s, 2s, 4s, ... capped at 32s

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use nexusync_core::embedding::Embedder;
use serde_json::Value;

use crate::config::EmbeddingConfig;
use crate::error::NexusError;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Build the embedder configured in `[embedding]`.
pub fn create_embedder(config: &EmbeddingConfig) -> crate::error::Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.provider.as_str() {
        "openai" => Arc::new(OpenAIEmbedder::new(config)?),
        "ollama" => Arc::new(OllamaEmbedder::new(config)?),
        #[cfg(feature = "local-embeddings")]
        "local" => Arc::new(LocalEmbedder::new(config)?),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => {
            return Err(NexusError::config(
                "the local embedding provider requires building with --features local-embeddings",
            ))
        }
        other => {
            return Err(NexusError::config(format!(
                "Unknown embedding provider: {}",
                other
            )))
        }
    };
    tracing::info!(
        provider = %config.provider,
        model = %embedder.model_name(),
        "embedding model ready"
    );
    Ok(embedder)
}

/// Dimensionality of well-known models, used when `dims` is not configured.
/// `0` means unknown; the index then records whatever the model returns.
pub fn known_dims(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
        "nomic-embed-text" | "nomic-embed-text-v1.5" | "bge-base-en-v1.5" => 768,
        "mxbai-embed-large" | "bge-large-en-v1.5" => 1024,
        "all-minilm" | "all-minilm-l6-v2" | "bge-small-en-v1.5" => 384,
        _ => 0,
    }
}

fn http_client(timeout_secs: u64) -> crate::error::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| NexusError::config(format!("failed to build HTTP client: {}", e)))
}

/// POST `body` to `url`, retrying transient failures, and return the JSON reply.
async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
    label: &str,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(attempt, ?delay, "{} retrying", label);
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }
                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!("{} error {}: {}", label, status, body_text));
                    continue;
                }
                bail!("{} error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} connection error ({}): {}", label, url, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed after retries", label)))
}

fn parse_vector(value: &Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow::anyhow!("embedding contains a non-number"))
        })
        .collect()
}

/// Parse `data[].embedding`, reordered by each item's `index`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, parse_vector(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(parse_vector)
        .collect()
}

fn check_count(expected: usize, got: &[Vec<f32>]) -> Result<()> {
    if got.len() != expected {
        bail!("embedding backend returned {} vectors for {} inputs", got.len(), expected);
    }
    Ok(())
}

// ============ OpenAI ============

/// Embeddings via the OpenAI API. Requires `OPENAI_API_KEY`.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> crate::error::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            NexusError::config("OPENAI_API_KEY environment variable not set")
        })?;
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims.unwrap_or_else(|| known_dims(&config.model)),
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            api_key,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            let body = serde_json::json!({ "model": self.model, "input": batch });
            let json = post_json_with_retry(
                &self.client,
                OPENAI_EMBEDDINGS_URL,
                Some(&self.api_key),
                &body,
                self.max_retries,
                "OpenAI embeddings",
            )
            .await?;
            let vectors = parse_openai_response(&json)?;
            check_count(batch.len(), &vectors)?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

// ============ Ollama ============

/// Embeddings via a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> crate::error::Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims.unwrap_or_else(|| known_dims(&config.model)),
            url: url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = format!("{}/api/embed", self.url);
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            let body = serde_json::json!({ "model": self.model, "input": batch });
            let json = post_json_with_retry(
                &self.client,
                &endpoint,
                None,
                &body,
                self.max_retries,
                "Ollama embeddings",
            )
            .await?;
            let vectors = parse_ollama_response(&json)?;
            check_count(batch.len(), &vectors)?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

// ============ Local (fastembed) ============

/// In-process embeddings. Models download from Hugging Face on first use.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> crate::error::Result<Self> {
        let which = match config.model.as_str() {
            "all-minilm-l6-v2" => fastembed::EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => fastembed::EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => fastembed::EmbeddingModel::BGEBaseENV15,
            "bge-large-en-v1.5" => fastembed::EmbeddingModel::BGELargeENV15,
            "nomic-embed-text-v1.5" => fastembed::EmbeddingModel::NomicEmbedTextV15,
            other => {
                return Err(NexusError::config(format!(
                    "Unknown local embedding model: '{}'",
                    other
                )))
            }
        };
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(which).with_show_download_progress(true),
        )
        .map_err(|e| NexusError::config(format!("failed to initialize local model: {}", e)))?;
        Ok(Self {
            model_name: config.model.clone(),
            dims: config.dims.unwrap_or_else(|| known_dims(&config.model)),
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let texts = texts.to_vec();
        let batch_size = self.batch_size;
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}
