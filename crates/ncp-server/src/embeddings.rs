// crates/ncp-server/src/embeddings.rs
// Embedding providers (C4): OpenAI-compatible HTTP client + deterministic hashing fallback

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{NcpError, Result};
use crate::util::normalize;

/// Max characters to embed (longer text is truncated)
const MAX_TEXT_CHARS: usize = 8000;

/// HTTP timeout
const TIMEOUT_SECS: u64 = 30;

/// Retry attempts for the HTTP provider
const RETRY_ATTEMPTS: usize = 2;

/// Dimension of the hashing projection fallback
pub const HASH_DIM: usize = 256;

/// Produces a fixed-dimension unit vector from free text. Deterministic for
/// a given (text, model id); an index never mixes model ids.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_id(&self) -> &str;
    fn dimension(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// OpenAI-compatible embeddings endpoint client.
pub struct HttpEmbeddings {
    api_key: String,
    model: String,
    url: String,
    dimension: usize,
    http_client: reqwest::Client,
}

impl HttpEmbeddings {
    pub fn new(api_key: String, model: String, url: String, dimension: usize) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key,
            model,
            url,
            dimension,
            http_client,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddings {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = if text.len() > MAX_TEXT_CHARS {
            let mut end = MAX_TEXT_CHARS;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            debug!("Truncating embed input from {} to {} chars", text.len(), end);
            &text[..end]
        } else {
            text
        };

        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let mut last_error: Option<String> = None;
        for attempt in 0..=RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }

            let response = match self
                .http_client
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                last_error = Some(format!("API error {status}: {text}"));
                continue;
            }

            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| NcpError::EmbeddingUnavailable(e.to_string()))?;
            let values = json["data"][0]["embedding"]
                .as_array()
                .ok_or_else(|| NcpError::EmbeddingUnavailable("invalid response".to_string()))?;
            let mut vector: Vec<f32> = values
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            if vector.len() != self.dimension {
                return Err(NcpError::EmbeddingUnavailable(format!(
                    "expected {} dimensions, got {}",
                    self.dimension,
                    vector.len()
                )));
            }
            normalize(&mut vector);
            return Ok(vector);
        }

        Err(NcpError::EmbeddingUnavailable(
            last_error.unwrap_or_else(|| "unknown error".to_string()),
        ))
    }
}

/// Deterministic hashing projection: each token is hashed with SHA-256 and
/// scattered into a fixed number of signed buckets. No network, no model
/// download, stable across runs — the fallback when no API key is present.
pub struct HashingEmbeddings {
    dimension: usize,
    model: String,
}

impl HashingEmbeddings {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model: format!("ncp-hash-{dimension}/1"),
        }
    }

    fn scatter(&self, token: &str, vector: &mut [f32], weight: f32) {
        let digest = Sha256::digest(token.as_bytes());
        // Four buckets per token: index from two bytes, sign from a third.
        for chunk in digest.chunks_exact(4) {
            let idx = u16::from_le_bytes([chunk[0], chunk[1]]) as usize % self.dimension;
            let sign = if chunk[2] & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign * weight;
        }
    }
}

impl Default for HashingEmbeddings {
    fn default() -> Self {
        Self::new(HASH_DIM)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddings {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            self.scatter(&token, &mut vector, 1.0);
            // Short prefixes catch morphological variants (delete/deletes).
            if token.len() > 4 {
                self.scatter(&token[..4], &mut vector, 0.5);
            }
        }
        normalize(&mut vector);
        Ok(vector)
    }
}

/// Pick a provider from the environment: an HTTP endpoint when an API key is
/// configured, otherwise the hashing fallback.
pub fn provider_from_env() -> Arc<dyn EmbeddingProvider> {
    let api_key = std::env::var("NCP_EMBEDDINGS_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .ok();
    match api_key {
        Some(key) if !key.is_empty() => {
            let model = std::env::var("NCP_EMBEDDINGS_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string());
            let url = std::env::var("NCP_EMBEDDINGS_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/embeddings".to_string());
            let dimension = std::env::var("NCP_EMBEDDINGS_DIM")
                .ok()
                .and_then(|d| d.parse().ok())
                .unwrap_or(1536);
            info!(model = %model, "Using HTTP embedding provider");
            Arc::new(HttpEmbeddings::new(key, model, url, dimension))
        }
        _ => {
            info!("No embeddings API key, using hashing projection");
            Arc::new(HashingEmbeddings::default())
        }
    }
}
