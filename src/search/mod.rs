//! Search functionality for Cortex
//!
//! Implements:
//! - Semantic search: exact cosine scan over a tenant's embedded memories
//! - Text fallback: substring match with fixed heuristic scores
//! - Threshold filtering with a last-resort text pass

mod engine;

pub use engine::SearchEngine;

use serde::{Deserialize, Serialize};

use crate::error::{CortexError, Result};
use crate::types::{BundleId, Memory, MemoryFilter, MemoryId, Metadata};

/// Score given to a text-fallback hit that does not contain the query
pub const DEFAULT_SIMILARITY: f32 = 0.5;

/// Score given to a text-fallback hit containing the query (case-insensitive)
pub const TEXT_MATCH_SIMILARITY: f32 = 0.8;

/// Result count used when a request asks for 0
pub const DEFAULT_QUERY_LIMIT: usize = 5;

/// Largest result count a request may ask for
pub const MAX_QUERY_LIMIT: usize = 100;

/// Which path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    /// Ranked by embedding similarity
    Semantic,
    /// Matched by substring, scored heuristically
    Text,
}

/// A memory with its relevance score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub similarity: f32,
    pub source: MatchSource,
}

/// Search request for a single tenant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Maximum results (0 = default)
    #[serde(default)]
    pub limit: usize,
    /// Minimum similarity in [0, 1]; 0 disables filtering
    #[serde(default)]
    pub threshold: f32,
    #[serde(default)]
    pub bundle_id: Option<BundleId>,
    /// Restrict to these ids (empty = all)
    #[serde(default)]
    pub ids: Vec<MemoryId>,
    /// Equality filters on metadata keys
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub include_archived: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_bundle(mut self, bundle_id: BundleId) -> Self {
        self.bundle_id = Some(bundle_id);
        self
    }

    pub fn with_ids(mut self, ids: Vec<MemoryId>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn including_archived(mut self) -> Self {
        self.include_archived = true;
        self
    }

    /// Reject an empty query or a threshold outside [0, 1]
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(CortexError::Validation("query must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(CortexError::Validation(format!(
                "threshold must be between 0 and 1, got {}",
                self.threshold
            )));
        }
        Ok(())
    }

    /// Threshold forced into [0, 1], for callers that prefer clamping to rejection
    pub fn clamped_threshold(&self) -> f32 {
        if self.threshold.is_nan() {
            return 0.0;
        }
        self.threshold.clamp(0.0, 1.0)
    }

    /// Limit with defaults applied
    pub fn effective_limit(&self) -> usize {
        match self.limit {
            0 => DEFAULT_QUERY_LIMIT,
            n => n.min(MAX_QUERY_LIMIT),
        }
    }

    pub(crate) fn filter(&self) -> MemoryFilter {
        MemoryFilter {
            bundle_id: self.bundle_id,
            ids: self.ids.clone(),
            metadata: self.metadata.clone(),
            include_archived: self.include_archived,
        }
    }
}

/// Heuristic score for a text-search hit
pub fn text_match_score(content: &str, query: &str) -> f32 {
    if content.to_lowercase().contains(&query.to_lowercase()) {
        TEXT_MATCH_SIMILARITY
    } else {
        DEFAULT_SIMILARITY
    }
}
