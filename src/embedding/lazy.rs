//! Lazily resolved embedder
//!
//! The configured backend is constructed on first use and cached for the life
//! of the value. A backend that cannot be constructed is reported once and
//! replaced by a hash embedder of [`DEFAULT_HASH_DIMENSIONS`], the width of
//! vectors stored by the default backend. Resolution is never retried.

use once_cell::sync::OnceCell;
use std::sync::Arc;

use super::{create_embedder, Embedder, HashEmbedder, DEFAULT_HASH_DIMENSIONS};
use crate::error::Result;
use crate::types::EmbeddingConfig;

pub struct LazyEmbedder {
    config: EmbeddingConfig,
    resolved: OnceCell<Arc<dyn Embedder>>,
}

impl LazyEmbedder {
    /// Create a lazy embedder. Nothing is constructed until the first call.
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            resolved: OnceCell::new(),
        }
    }

    /// Whether the backend has been resolved yet
    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    fn backend(&self) -> &Arc<dyn Embedder> {
        self.resolved.get_or_init(|| match create_embedder(&self.config) {
            Ok(embedder) => {
                tracing::info!(
                    model = embedder.model_name(),
                    dimensions = embedder.dimensions(),
                    "Embedding backend initialized"
                );
                embedder
            }
            Err(e) => {
                tracing::warn!(
                    "Embedding backend '{}' unavailable, using hash embedder: {}",
                    self.config.model,
                    e
                );
                // The configured width belongs to the failed backend
                Arc::new(HashEmbedder::new(DEFAULT_HASH_DIMENSIONS))
            }
        })
    }
}

impl Embedder for LazyEmbedder {
    fn embed(&self, text: &str, content_type: &str) -> Result<Vec<f32>> {
        self.backend().embed(text, content_type)
    }

    fn embed_batch(&self, texts: &[&str], content_type: &str) -> Result<Vec<Vec<f32>>> {
        self.backend().embed_batch(texts, content_type)
    }

    fn dimensions(&self) -> usize {
        self.backend().dimensions()
    }

    fn model_name(&self) -> &str {
        self.backend().model_name()
    }
}
