//! Model capability traits and built-in provider implementations.
//!
//! Defines the [`CompletionModel`] and [`EmbeddingModel`] capabilities and the
//! [`ModelFactory`] that turns a [`ModelConfig`] into them:
//! - **`ollama`**: local Ollama instance (`/api/generate`, `/api/embed`).
//! - **`openai`**: any OpenAI-compatible endpoint (chat completions, embeddings).
//! - **`remote`**: a bearer-token inference service speaking
//!   `{"type": "inference" | "embeddings", "texts": [...]}`.
//! - **`hashing`**: offline feature-hashing embedder; no completion role.
//!
//! # Retry Strategy
//!
//! HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ModelConfig, Role};

/// Text generation capability. Must tolerate concurrent calls.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Text embedding capability. Must tolerate concurrent calls.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Identifier stored alongside vectors so collections from different
    /// embedders never mix.
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Creates capabilities from a model definition.
///
/// Creation may be expensive (model download, connection setup); the
/// [`ModelRegistry`](crate::model_registry::ModelRegistry) calls it at most
/// once per name and role.
#[async_trait]
pub trait ModelFactory: Send + Sync {
    /// Whether this factory knows the provider type and can serve `role` for it.
    fn supports(&self, kind: &str, role: Role) -> bool;

    async fn create_completion(&self, config: &ModelConfig) -> Result<Arc<dyn CompletionModel>>;

    async fn create_embedding(&self, config: &ModelConfig) -> Result<Arc<dyn EmbeddingModel>>;
}

/// Factory for the providers compiled into this crate.
pub struct BuiltinFactory;

#[async_trait]
impl ModelFactory for BuiltinFactory {
    fn supports(&self, kind: &str, role: Role) -> bool {
        match kind {
            "ollama" | "openai" | "remote" => true,
            "hashing" => role == Role::Embedding,
            _ => false,
        }
    }

    async fn create_completion(&self, config: &ModelConfig) -> Result<Arc<dyn CompletionModel>> {
        match config.kind.as_str() {
            "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
            "openai" => Ok(Arc::new(OpenAiModel::new(config)?)),
            "remote" => Ok(Arc::new(RemoteModel::new(config)?)),
            other => bail!("provider '{}' has no completion capability", other),
        }
    }

    async fn create_embedding(&self, config: &ModelConfig) -> Result<Arc<dyn EmbeddingModel>> {
        match config.kind.as_str() {
            "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
            "openai" => Ok(Arc::new(OpenAiModel::new(config)?)),
            "remote" => Ok(Arc::new(RemoteModel::new(config)?)),
            "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dims.unwrap_or(256)))),
            other => bail!("Unknown model provider: {}", other),
        }
    }
}

fn http_client(config: &ModelConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// Send a JSON request with retry/backoff, returning the parsed response body.
///
/// `build` is called once per attempt since a `RequestBuilder` is consumed by `send`.
async fn send_with_retry<F>(label: &str, max_retries: u32, build: F) -> Result<Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error, retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    tracing::warn!(provider = label, %status, attempt, "retryable provider error");
                    last_err = Some(anyhow!("{} error {}: {}", label, status, body_text));
                    continue;
                }

                // Client error (not 429), no retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("{} error {}: {}", label, status, body_text);
            }
            Err(e) => {
                tracing::warn!(provider = label, error = %e, attempt, "provider connection error");
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} failed after retries", label)))
}

fn parse_vector(value: &Value) -> Result<Vec<f32>> {
    Ok(value
        .as_array()
        .ok_or_else(|| anyhow!("embedding is not an array"))?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ Ollama ============

pub struct OllamaModel {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaModel {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("model '{}': `model` is required for ollama", config.name))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model,
            url,
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl CompletionModel for OllamaModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({ "model": self.model, "prompt": prompt, "stream": false });
        let endpoint = format!("{}/api/generate", self.url);
        let json = send_with_retry("Ollama", self.max_retries, || {
            self.client.post(&endpoint).json(&body)
        })
        .await
        .with_context(|| format!("is Ollama running at {}?", self.url))?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing response"))
    }
}

#[async_trait]
impl EmbeddingModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({ "model": self.model, "input": [text] });
        let endpoint = format!("{}/api/embed", self.url);
        let json = send_with_retry("Ollama", self.max_retries, || {
            self.client.post(&endpoint).json(&body)
        })
        .await?;

        let first = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .and_then(|e| e.first())
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;
        parse_vector(first)
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAiModel {
    model: String,
    base_url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiModel {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("model '{}': `model` is required for openai", config.name))?;
        let api_key = match &config.api_key {
            Some(key) => key.clone(),
            None => std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?,
        };
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            model,
            base_url,
            api_key,
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let endpoint = format!("{}/{}", self.base_url, path);
        send_with_retry("OpenAI", self.max_retries, || {
            self.client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(body)
        })
        .await
    }
}

#[async_trait]
impl CompletionModel for OpenAiModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let json = self.post("chat/completions", &body).await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({ "model": self.model, "input": [text] });
        let json = self.post("embeddings", &body).await?;
        let embedding = json
            .pointer("/data/0/embedding")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        parse_vector(embedding)
    }
}

// ============ Remote inference service ============

pub struct RemoteModel {
    name: String,
    url: String,
    token: Option<String>,
    hostname: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl RemoteModel {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow!("model '{}': `url` is required for remote", config.name))?;
        Ok(Self {
            name: config.name.clone(),
            url,
            token: config.token.clone(),
            hostname: config.hostname.clone(),
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }

    async fn call(&self, kind: &str, texts: &[&str]) -> Result<Vec<Value>> {
        let body = json!({ "type": kind, "texts": texts });
        let json = send_with_retry("Remote model", self.max_retries, || {
            let mut req = self.client.post(&self.url).json(&body);
            if let Some(token) = &self.token {
                req = req.bearer_auth(token);
            }
            if let Some(host) = &self.hostname {
                req = req.header(reqwest::header::HOST, host);
            }
            req
        })
        .await?;

        json.get("outputs")
            .and_then(|o| o.as_array())
            .cloned()
            .ok_or_else(|| anyhow!("Invalid remote response: missing outputs"))
    }
}

#[async_trait]
impl CompletionModel for RemoteModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let outputs = self.call("inference", &[prompt]).await?;
        outputs
            .first()
            .and_then(|o| o.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid remote response: outputs[0] is not text"))
    }
}

#[async_trait]
impl EmbeddingModel for RemoteModel {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let outputs = self.call("embeddings", &[text]).await?;
        let first = outputs
            .first()
            .ok_or_else(|| anyhow!("Invalid remote response: empty outputs"))?;
        parse_vector(first)
    }
}

// ============ Feature hashing ============

/// Deterministic bag-of-words embedder.
///
/// Each lowercase alphanumeric token is hashed with SHA-256 into one of
/// `dims` buckets with a hash-derived sign; the result is L2-normalized.
/// Texts that share vocabulary land close together, with no model download.
pub struct HashingEmbedder {
    name: String,
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            name: format!("hashing-{}", dims),
            dims,
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingModel for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}
