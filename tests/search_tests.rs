//! Integration tests for semantic search and its text fallback
//!
//! Search ranking tests use a keyword embedder with predictable vectors
//! instead of the hash embedder.
//!
//! Run with: cargo test --test search_tests

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use cortex::embedding::{normalize, Embedder};
use cortex::error::{CortexError, Result};
use cortex::search::{
    MatchSource, SearchEngine, SearchRequest, DEFAULT_SIMILARITY, TEXT_MATCH_SIMILARITY,
};
use cortex::storage::Storage;
use cortex::store::MemoryStore;
use cortex::types::{Memory, Metadata, NewMemory, Tenant};

/// One axis per keyword plus a small shared bias
struct KeywordEmbedder;

const KEYWORDS: [&str; 3] = ["coffee", "tea", "travel"];

impl Embedder for KeywordEmbedder {
    fn embed(&self, text: &str, _content_type: &str) -> Result<Vec<f32>> {
        let text = text.to_lowercase();
        let mut vector: Vec<f32> = KEYWORDS
            .iter()
            .map(|k| if text.contains(k) { 1.0 } else { 0.0 })
            .collect();
        vector.push(0.1);
        Ok(normalize(&vector))
    }

    fn dimensions(&self) -> usize {
        KEYWORDS.len() + 1
    }

    fn model_name(&self) -> &str {
        "keyword"
    }
}

struct OfflineEmbedder;

impl Embedder for OfflineEmbedder {
    fn embed(&self, _text: &str, _content_type: &str) -> Result<Vec<f32>> {
        Err(CortexError::ProviderUnavailable("connection refused".to_string()))
    }

    fn dimensions(&self) -> usize {
        KEYWORDS.len() + 1
    }

    fn model_name(&self) -> &str {
        "offline"
    }
}

fn keyword_store() -> MemoryStore {
    MemoryStore::new(Storage::open_in_memory().unwrap(), Arc::new(KeywordEmbedder))
}

fn seed(store: &MemoryStore, tenant: &Tenant, contents: &[&str]) -> Vec<Memory> {
    contents
        .iter()
        .map(|c| store.remember(tenant, &NewMemory::new(*c)).unwrap())
        .collect()
}

// ============================================================================
// SEMANTIC RANKING
// ============================================================================

#[test]
fn test_semantic_ranking() {
    let store = keyword_store();
    let tenant = Tenant::new("app", "user");
    let memories = seed(
        &store,
        &tenant,
        &["Green tea before bed", "Drinks coffee every morning", "Planning travel to Japan"],
    );

    let results = store.search(&tenant, &SearchRequest::new("coffee")).unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].memory.id, memories[1].id);
    assert_eq!(results[0].source, MatchSource::Semantic);
    assert!(results[0].similarity > 0.99);
    for window in results.windows(2) {
        assert!(window[0].similarity >= window[1].similarity);
    }
}

#[test]
fn test_ties_keep_most_recent_first() {
    let store = keyword_store();
    let tenant = Tenant::new("app", "user");
    let memories = seed(&store, &tenant, &["coffee one", "coffee two", "coffee three"]);

    let results = store.search(&tenant, &SearchRequest::new("coffee")).unwrap();
    let ids: Vec<_> = results.iter().map(|r| r.memory.id).collect();

    assert_eq!(ids, vec![memories[2].id, memories[1].id, memories[0].id]);
}

#[test]
fn test_threshold_filters_results() {
    let store = keyword_store();
    let tenant = Tenant::new("app", "user");
    let memories = seed(&store, &tenant, &["Coffee with oat milk", "Tea with lemon"]);

    let results = store
        .search(&tenant, &SearchRequest::new("coffee").with_threshold(0.5))
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.id, memories[0].id);
}

#[test]
fn test_limit_defaults_and_caps() {
    let store = keyword_store();
    let tenant = Tenant::new("app", "user");
    let contents: Vec<String> = (0..8).map(|i| format!("coffee note {}", i)).collect();
    let refs: Vec<&str> = contents.iter().map(String::as_str).collect();
    seed(&store, &tenant, &refs);

    assert_eq!(store.search(&tenant, &SearchRequest::new("coffee")).unwrap().len(), 5);
    assert_eq!(
        store
            .search(&tenant, &SearchRequest::new("coffee").with_limit(3))
            .unwrap()
            .len(),
        3
    );
}

// ============================================================================
// TEXT FALLBACK
// ============================================================================

#[test]
fn test_fallback_when_nothing_clears_threshold() {
    let store = keyword_store();
    let tenant = Tenant::new("app", "user");
    let memories = seed(&store, &tenant, &["Espresso or tea after lunch", "Travel by train"]);

    let results = store
        .search(&tenant, &SearchRequest::new("espresso").with_threshold(0.5))
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.id, memories[0].id);
    assert_eq!(results[0].source, MatchSource::Text);
    assert_eq!(results[0].similarity, TEXT_MATCH_SIMILARITY);
}

#[test]
fn test_fallback_when_query_embedding_fails() {
    let storage = Storage::open_in_memory().unwrap();
    let tenant = Tenant::new("app", "user");
    let writer = MemoryStore::new(storage.clone(), Arc::new(KeywordEmbedder));
    let memories = seed(&writer, &tenant, &["Coffee at 7am", "Tea at noon"]);

    let engine = SearchEngine::new(storage, Arc::new(OfflineEmbedder));
    let results = engine
        .semantic_search(&tenant, &SearchRequest::new("COFFEE"))
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.id, memories[0].id);
    assert_eq!(results[0].source, MatchSource::Text);
    assert_eq!(results[0].similarity, TEXT_MATCH_SIMILARITY);
}

#[test]
fn test_fallback_when_no_embeddings_exist() {
    let storage = Storage::open_in_memory().unwrap();
    let tenant = Tenant::new("app", "user");
    let writer = MemoryStore::new(storage.clone(), Arc::new(OfflineEmbedder));
    seed(&writer, &tenant, &["Coffee grinder settings"]);

    let engine = SearchEngine::new(storage, Arc::new(KeywordEmbedder));
    let results = engine
        .semantic_search(&tenant, &SearchRequest::new("grinder"))
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].source, MatchSource::Text);
    assert!(!results[0].memory.has_embedding);
}

#[test]
fn test_text_search_escapes_wildcards() {
    let store = keyword_store();
    let tenant = Tenant::new("app", "user");
    let memories = seed(&store, &tenant, &["Battery at 100%", "Battery at 1000 mAh", "snake_case"]);
    let engine = store.search_engine();

    let results = engine.text_search(&tenant, &SearchRequest::new("100%")).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.id, memories[0].id);

    let results = engine.text_search(&tenant, &SearchRequest::new("e_c")).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.id, memories[2].id);
}

#[test]
fn test_text_scores_are_heuristic() {
    assert!(TEXT_MATCH_SIMILARITY > DEFAULT_SIMILARITY);

    let store = keyword_store();
    let tenant = Tenant::new("app", "user");
    seed(&store, &tenant, &["Ordered a Flat White"]);

    let results = store
        .search_engine()
        .text_search(&tenant, &SearchRequest::new("flat white"))
        .unwrap();
    assert_eq!(results[0].similarity, TEXT_MATCH_SIMILARITY);
}

// ============================================================================
// FILTERS AND ISOLATION
// ============================================================================

#[test]
fn test_tenant_isolation() {
    let store = keyword_store();
    let alice = Tenant::new("app", "alice");
    let bob = Tenant::new("app", "bob");
    let other_app = Tenant::new("other", "alice");

    seed(&store, &alice, &["Alice drinks coffee"]);
    seed(&store, &bob, &["Bob drinks coffee"]);
    seed(&store, &other_app, &["Other app coffee"]);

    for request in [
        SearchRequest::new("coffee"),
        SearchRequest::new("drinks coffee").with_threshold(0.99),
    ] {
        let results = store.search(&alice, &request).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.memory.tenant == alice));
    }

    let text = store
        .search_engine()
        .text_search(&bob, &SearchRequest::new("coffee"))
        .unwrap();
    assert_eq!(text.len(), 1);
    assert_eq!(text[0].memory.content, "Bob drinks coffee");
}

#[test]
fn test_filters_apply_to_both_paths() {
    let store = keyword_store();
    let tenant = Tenant::new("app", "user");
    let bundle = store.create_bundle(&tenant, "Cafe").unwrap();

    let in_bundle = store
        .remember(
            &tenant,
            &NewMemory::new("Coffee shop on 5th")
                .with_bundle(bundle.id)
                .with_metadata([("city".to_string(), json!("nyc"))].into_iter().collect::<Metadata>()),
        )
        .unwrap();
    let loose = store.remember(&tenant, &NewMemory::new("Coffee beans from Brazil")).unwrap();

    let by_bundle = SearchRequest::new("coffee").with_bundle(bundle.id);
    let results = store.search(&tenant, &by_bundle).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.id, in_bundle.id);

    let by_metadata = SearchRequest::new("coffee")
        .with_metadata([("city".to_string(), json!("nyc"))].into_iter().collect());
    let results = store.search_engine().text_search(&tenant, &by_metadata).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.id, in_bundle.id);

    let by_ids = SearchRequest::new("coffee").with_ids(vec![loose.id]);
    let results = store.search(&tenant, &by_ids).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.id, loose.id);
}

#[test]
fn test_archived_excluded_by_default() {
    let store = keyword_store();
    let tenant = Tenant::new("app", "user");
    let mut memory = store.remember(&tenant, &NewMemory::new("Old coffee order")).unwrap();

    memory.status = cortex::types::MemoryStatus::Archived;
    store.update(&memory).unwrap();

    assert!(store.search(&tenant, &SearchRequest::new("coffee")).unwrap().is_empty());
    let results = store
        .search(&tenant, &SearchRequest::new("coffee").including_archived())
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn test_invalid_requests_rejected() {
    let store = keyword_store();
    let tenant = Tenant::new("app", "user");

    let err = store.search(&tenant, &SearchRequest::new("")).unwrap_err();
    assert!(matches!(err, CortexError::Validation(_)));

    let err = store
        .search(&tenant, &SearchRequest::new("coffee").with_threshold(1.2))
        .unwrap_err();
    assert!(matches!(err, CortexError::Validation(_)));

    let unsafe_key = SearchRequest::new("coffee")
        .with_metadata([("a') OR 1=1 --".to_string(), json!("x"))].into_iter().collect());
    seed(&store, &tenant, &["coffee"]);
    assert!(store.search_engine().text_search(&tenant, &unsafe_key).is_err());
}
