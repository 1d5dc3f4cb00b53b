//! Semantic search with text fallback

use std::sync::Arc;

use super::{text_match_score, MatchSource, ScoredMemory, SearchRequest};
use crate::embedding::{cosine_similarity, decode_vector, Embedder};
use crate::error::Result;
use crate::storage::{queries, Storage};
use crate::types::{Tenant, TextQuery, DEFAULT_CONTENT_TYPE};

/// Tenant-scoped search over stored memories
pub struct SearchEngine {
    storage: Storage,
    embedder: Arc<dyn Embedder>,
}

impl SearchEngine {
    pub fn new(storage: Storage, embedder: Arc<dyn Embedder>) -> Self {
        Self { storage, embedder }
    }

    /// Rank memories by similarity to the query
    ///
    /// Falls back to text search when the query cannot be embedded, when no
    /// candidate has an embedding, or when nothing clears the threshold.
    /// Results are sorted by descending similarity; ties keep most-recent-first
    /// order.
    pub fn semantic_search(
        &self,
        tenant: &Tenant,
        request: &SearchRequest,
    ) -> Result<Vec<ScoredMemory>> {
        request.validate()?;

        let query_vector = match self.embedder.embed(&request.query, DEFAULT_CONTENT_TYPE) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Query embedding failed, using text search: {}", e);
                return self.text_results(tenant, request);
            }
        };

        let filter = request.filter();
        let candidates = self
            .storage
            .with_connection(|conn| queries::load_embedded_candidates(conn, tenant, &filter))?;

        let mut scored: Vec<ScoredMemory> = Vec::with_capacity(candidates.len());
        for (memory, raw) in candidates {
            let vector = match decode_vector(&raw) {
                Ok(Some(v)) => v,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(memory_id = memory.id, "Skipping memory: {}", e);
                    continue;
                }
            };
            scored.push(ScoredMemory {
                similarity: cosine_similarity(&query_vector, &vector),
                memory,
                source: MatchSource::Semantic,
            });
        }

        if scored.is_empty() {
            tracing::debug!(tenant = %tenant, "No embedded candidates, using text search");
            return self.text_results(tenant, request);
        }

        // Stable: equal scores keep candidate order
        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        if request.threshold > 0.0 {
            scored.retain(|s| s.similarity >= request.threshold);
        }
        scored.truncate(request.effective_limit());

        if scored.is_empty() {
            tracing::debug!(
                threshold = request.threshold,
                "Nothing cleared the threshold, appending text results"
            );
            return self.text_results(tenant, request);
        }

        Ok(scored)
    }

    /// Substring search with heuristic scores
    pub fn text_search(&self, tenant: &Tenant, request: &SearchRequest) -> Result<Vec<ScoredMemory>> {
        request.validate()?;
        self.text_results(tenant, request)
    }

    fn text_results(&self, tenant: &Tenant, request: &SearchRequest) -> Result<Vec<ScoredMemory>> {
        let query = TextQuery {
            query: request.query.clone(),
            limit: request.effective_limit(),
            filter: request.filter(),
        };
        let memories = self
            .storage
            .with_connection(|conn| queries::search_text(conn, tenant, &query))?;

        let results = memories
            .into_iter()
            .map(|memory| ScoredMemory {
                similarity: text_match_score(&memory.content, &request.query),
                memory,
                source: MatchSource::Text,
            })
            .filter(|s| request.threshold <= 0.0 || s.similarity >= request.threshold)
            .collect();

        Ok(results)
    }
}
