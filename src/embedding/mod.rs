//! Embedding generation and async queue management
//!
//! Supports multiple embedding backends:
//! - Deterministic hash embedder (no external dependencies, default)
//! - OpenAI-compatible API (text-embedding-3-small) - requires `openai` feature
//!
//! The backend is chosen once from [`EmbeddingConfig`] and shared as an
//! `Arc<dyn Embedder>` by search, lifecycle maintenance and the write path.
//!
//! # Feature Flags
//!
//! - `openai`: Enables OpenAI embedding backend (requires API key)

mod hash;
mod lazy;
mod queue;
pub mod vector;

pub use hash::{HashEmbedder, DEFAULT_HASH_DIMENSIONS};
pub use lazy::LazyEmbedder;
pub use queue::{backfill_embeddings, EmbeddingQueue, EmbeddingRequest, EmbeddingWorker};
pub use vector::{cosine_similarity, decode_vector, encode_vector, normalize};

use std::sync::Arc;

use crate::error::{CortexError, Result};
use crate::types::{EmbeddingConfig, Metadata, DEFAULT_CONTENT_TYPE};

/// Trait for embedding generators
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    fn embed(&self, text: &str, content_type: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    fn embed_batch(&self, texts: &[&str], content_type: &str) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t, content_type)).collect()
    }

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// OpenAI embedding client
///
/// Requires the `openai` feature to be enabled.
/// Supports OpenAI, OpenRouter, Azure OpenAI, and other OpenAI-compatible APIs.
#[cfg(feature = "openai")]
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

#[cfg(feature = "openai")]
impl OpenAIEmbedder {
    /// Create a new OpenAI embedder with default settings
    pub fn new(api_key: String) -> Self {
        Self::with_config(api_key, None, None, None)
    }

    /// Create a new OpenAI embedder with custom settings
    ///
    /// # Arguments
    /// * `api_key` - API key for authentication
    /// * `base_url` - API base URL (e.g., "https://openrouter.ai/api/v1" for OpenRouter)
    /// * `model` - Model name (e.g., "openai/text-embedding-3-small" for OpenRouter)
    /// * `dimensions` - Expected embedding dimensions (must match model output)
    pub fn with_config(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        dimensions: Option<usize>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: model.unwrap_or_else(|| "text-embedding-3-small".to_string()),
            dimensions: dimensions.unwrap_or(1536),
        }
    }

    /// Async batch embedding (up to 2048 inputs per call)
    pub async fn embed_batch_async(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let url = format!("{}/embeddings", self.base_url);
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(2048) {
            let request = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&serde_json::json!({
                    "input": chunk,
                    "model": self.model,
                }));

            let response = request
                .send()
                .await
                .map_err(|e| CortexError::ProviderUnavailable(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(CortexError::ProviderUnavailable(format!(
                    "Embedding API error {}: {}",
                    status, text
                )));
            }

            let data: serde_json::Value = response.json().await?;
            let items = data["data"].as_array().ok_or_else(|| {
                CortexError::ProviderUnavailable("Invalid response format".to_string())
            })?;

            for item in items {
                let embedding: Vec<f32> = item["embedding"]
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect()
                    })
                    .unwrap_or_default();

                if embedding.len() != self.dimensions {
                    return Err(CortexError::ProviderUnavailable(format!(
                        "Embedding dimensions mismatch: expected {}, got {}",
                        self.dimensions,
                        embedding.len()
                    )));
                }
                all_embeddings.push(embedding);
            }
        }

        if all_embeddings.len() != texts.len() {
            return Err(CortexError::ProviderUnavailable(format!(
                "Embedding API returned {} vectors for {} inputs",
                all_embeddings.len(),
                texts.len()
            )));
        }

        Ok(all_embeddings)
    }

    /// Async embedding call to OpenAI-compatible API
    pub async fn embed_async(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch_async(&[text]).await?;
        embeddings
            .pop()
            .ok_or_else(|| CortexError::ProviderUnavailable("no embedding returned".to_string()))
    }
}

#[cfg(feature = "openai")]
impl Embedder for OpenAIEmbedder {
    fn embed(&self, text: &str, _content_type: &str) -> Result<Vec<f32>> {
        // Blocking call for sync interface
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.embed_async(text))
        })
    }

    fn embed_batch(&self, texts: &[&str], _content_type: &str) -> Result<Vec<Vec<f32>>> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.embed_batch_async(texts))
        })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Create an embedder from configuration
///
/// Available models depend on enabled features:
/// - `"hash"`: Always available, no external dependencies
/// - `"openai"`: Requires `openai` feature and API key
///
/// For OpenAI-compatible APIs (OpenRouter, Azure, etc.), set:
/// - `base_url`: API endpoint (e.g., "https://openrouter.ai/api/v1")
/// - `embedding_model`: Model name (e.g., "openai/text-embedding-3-small")
/// - `dimensions`: Expected output dimensions
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.model.as_str() {
        #[cfg(feature = "openai")]
        "openai" => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                CortexError::Config(
                    "OPENAI_API_KEY required when CORTEX_EMBEDDING_MODEL=openai".to_string(),
                )
            })?;
            Ok(Arc::new(OpenAIEmbedder::with_config(
                api_key,
                config.base_url.clone(),
                config.embedding_model.clone(),
                Some(config.dimensions),
            )))
        }
        #[cfg(not(feature = "openai"))]
        "openai" => Err(CortexError::Config(
            "OpenAI embeddings require the 'openai' feature to be enabled. Build with: cargo build --features openai".to_string(),
        )),
        "hash" | "local" => Ok(Arc::new(HashEmbedder::new(config.dimensions))),
        _ => Err(CortexError::Config(format!(
            "Unknown embedding model: '{}'. Use 'openai' or 'hash'",
            config.model
        ))),
    }
}

/// Classify content for embedding model selection
///
/// An explicit `contentType` / `content_type` metadata entry wins. Otherwise
/// inline `data:image/...` payloads report their MIME type, and http(s) URLs
/// pointing at jpg/jpeg/png/pdf files map to the matching type. Everything
/// else is plain text.
pub fn detect_content_type(content: &str, metadata: &Metadata) -> String {
    if let Some(explicit) = metadata.content_type_hint() {
        return explicit.to_string();
    }

    if let Some(rest) = content.strip_prefix("data:") {
        if rest.starts_with("image/") {
            let mime = rest.split(';').next().unwrap_or(rest);
            return mime.to_string();
        }
    }

    if content.starts_with("http://") || content.starts_with("https://") {
        let lower = content.to_lowercase();
        if lower.contains(".jpg") || lower.contains(".jpeg") {
            return "image/jpeg".to_string();
        }
        if lower.contains(".png") {
            return "image/png".to_string();
        }
        if lower.contains(".pdf") {
            return "application/pdf".to_string();
        }
    }

    DEFAULT_CONTENT_TYPE.to_string()
}
