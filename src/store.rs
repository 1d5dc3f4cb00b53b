//! Memory store facade
//!
//! Ties the repository, the embedder and the optional embedding queue into
//! the write path: validate, persist, then embed. Embedding never blocks a
//! write from succeeding; a memory without a vector is still found by text
//! search and can be picked up later by [`MemoryStore::backfill_embeddings`].

use std::sync::Arc;

use crate::embedding::{self, Embedder, EmbeddingQueue, EmbeddingRequest};
use crate::error::Result;
use crate::lifecycle::{embed_and_store, LifecycleEngine};
use crate::search::{ScoredMemory, SearchEngine, SearchRequest};
use crate::storage::{bundles, entities, queries, Storage};
use crate::types::{
    Bundle, BundleId, Entity, Memory, MemoryId, MemoryVersion, Metadata, NewMemory, Relation,
    Tenant, TenantStats,
};

/// `changed_by` recorded for caller-initiated updates
pub const CHANGED_BY_API: &str = "api";

/// Tenant-scoped entry point over a single database
#[derive(Clone)]
pub struct MemoryStore {
    storage: Storage,
    embedder: Arc<dyn Embedder>,
    queue: Option<EmbeddingQueue>,
}

impl MemoryStore {
    /// Store that embeds inline on the calling thread
    pub fn new(storage: Storage, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            storage,
            embedder,
            queue: None,
        }
    }

    /// Hand embedding work to a queue drained by an [`EmbeddingWorker`](crate::embedding::EmbeddingWorker)
    pub fn with_queue(mut self, queue: EmbeddingQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    pub fn search_engine(&self) -> SearchEngine {
        SearchEngine::new(self.storage.clone(), self.embedder())
    }

    pub fn lifecycle_engine(&self) -> LifecycleEngine {
        LifecycleEngine::new(self.storage.clone(), self.embedder())
    }

    /// Validate and persist a memory, then schedule its embedding
    pub fn remember(&self, tenant: &Tenant, input: &NewMemory) -> Result<Memory> {
        input.validate()?;

        let memory = self
            .storage
            .with_connection(|conn| queries::create_memory(conn, tenant, input))?;

        Ok(self.schedule_embedding(memory))
    }

    pub fn get(&self, tenant: &Tenant, id: MemoryId) -> Result<Memory> {
        self.storage
            .with_connection(|conn| queries::get_memory(conn, id, tenant, false))
    }

    /// Persist a modified memory, recording a version of its previous state
    ///
    /// A content change clears the stored vector and schedules a new one.
    pub fn update(&self, memory: &Memory) -> Result<Memory> {
        memory.validate()?;

        let updated = self
            .storage
            .with_transaction(|conn| queries::update_memory(conn, memory, CHANGED_BY_API))?;

        if updated.has_embedding {
            Ok(updated)
        } else {
            Ok(self.schedule_embedding(updated))
        }
    }

    pub fn forget(&self, tenant: &Tenant, id: MemoryId) -> Result<()> {
        self.storage
            .with_connection(|conn| queries::delete_memory(conn, id, tenant))
    }

    pub fn list(
        &self,
        tenant: &Tenant,
        limit: i64,
        offset: i64,
        include_archived: bool,
    ) -> Result<Vec<Memory>> {
        self.storage.with_connection(|conn| {
            queries::list_memories(conn, tenant, limit, offset, include_archived)
        })
    }

    pub fn versions(&self, tenant: &Tenant, id: MemoryId) -> Result<Vec<MemoryVersion>> {
        self.storage
            .with_connection(|conn| queries::list_versions(conn, id, tenant))
    }

    /// Semantic search with text fallback
    pub fn search(&self, tenant: &Tenant, request: &SearchRequest) -> Result<Vec<ScoredMemory>> {
        self.search_engine().semantic_search(tenant, request)
    }

    pub fn create_bundle(&self, tenant: &Tenant, name: &str) -> Result<Bundle> {
        self.storage
            .with_connection(|conn| bundles::create_bundle(conn, tenant, name))
    }

    pub fn list_bundles(&self, tenant: &Tenant) -> Result<Vec<Bundle>> {
        self.storage
            .with_connection(|conn| bundles::list_bundles(conn, tenant))
    }

    /// Delete a bundle; its memories are kept and detached
    pub fn delete_bundle(&self, tenant: &Tenant, id: BundleId) -> Result<()> {
        self.storage
            .with_transaction(|conn| bundles::delete_bundle(conn, id, tenant))
    }

    /// Set one fact on a named entity, keeping its other facts
    pub fn set_fact(
        &self,
        tenant: &Tenant,
        entity: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<Entity> {
        self.storage
            .with_transaction(|conn| entities::set_fact(conn, tenant, entity, key, value))
    }

    /// Create an entity or replace all of its facts
    pub fn upsert_entity(&self, tenant: &Tenant, name: &str, data: &Metadata) -> Result<Entity> {
        self.storage
            .with_connection(|conn| entities::upsert_entity(conn, tenant, name, data))
    }

    pub fn get_entity(&self, tenant: &Tenant, name: &str) -> Result<Entity> {
        self.storage
            .with_connection(|conn| entities::get_entity(conn, tenant, name))
    }

    pub fn list_entities(&self, tenant: &Tenant) -> Result<Vec<Entity>> {
        self.storage
            .with_connection(|conn| entities::list_entities(conn, tenant))
    }

    pub fn add_relation(
        &self,
        tenant: &Tenant,
        from: &str,
        to: &str,
        relation_type: &str,
    ) -> Result<Relation> {
        self.storage
            .with_connection(|conn| entities::upsert_relation(conn, tenant, from, to, relation_type))
    }

    /// Relations touching `entity`, or all of the tenant's relations
    pub fn relations(&self, tenant: &Tenant, entity: Option<&str>) -> Result<Vec<Relation>> {
        self.storage
            .with_connection(|conn| entities::list_relations(conn, tenant, entity))
    }

    pub fn stats(&self, tenant: &Tenant) -> Result<TenantStats> {
        self.storage
            .with_connection(|conn| queries::get_stats(conn, tenant))
    }

    /// Embed up to `batch_size` memories that have no vector yet (0 = 10)
    pub fn backfill_embeddings(&self, batch_size: usize) -> Result<usize> {
        embedding::backfill_embeddings(&self.storage, self.embedder.as_ref(), batch_size)
    }

    fn schedule_embedding(&self, memory: Memory) -> Memory {
        if let Some(queue) = &self.queue {
            if let Err(e) = queue.try_queue(EmbeddingRequest::from(&memory)) {
                tracing::warn!(memory_id = memory.id, "Could not queue embedding: {}", e);
            }
            return memory;
        }

        match embed_and_store(&self.storage, self.embedder.as_ref(), &memory) {
            Ok(_) => self.reload(memory),
            Err(e) => {
                tracing::warn!(memory_id = memory.id, "Embedding failed, stored without vector: {}", e);
                memory
            }
        }
    }

    fn reload(&self, memory: Memory) -> Memory {
        self.storage
            .with_connection(|conn| queries::get_memory(conn, memory.id, &memory.tenant, true))
            .unwrap_or(memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingWorker, HashEmbedder};
    use crate::error::CortexError;

    struct OfflineEmbedder;

    impl Embedder for OfflineEmbedder {
        fn embed(&self, _text: &str, _content_type: &str) -> Result<Vec<f32>> {
            Err(CortexError::ProviderUnavailable("offline".to_string()))
        }

        fn dimensions(&self) -> usize {
            384
        }

        fn model_name(&self) -> &str {
            "offline"
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::new(
            Storage::open_in_memory().unwrap(),
            Arc::new(HashEmbedder::default()),
        )
    }

    #[test]
    fn test_remember_embeds_inline() {
        let store = store();
        let tenant = Tenant::new("app", "user");

        let memory = store
            .remember(&tenant, &NewMemory::new("Prefers window seats"))
            .unwrap();
        assert!(memory.has_embedding);
        assert_eq!(memory.content_type, "text/plain");
        assert_eq!(store.get(&tenant, memory.id).unwrap().content, "Prefers window seats");
    }

    #[test]
    fn test_remember_rejects_invalid_input() {
        let store = store();
        let tenant = Tenant::new("app", "user");

        let err = store.remember(&tenant, &NewMemory::new("   ")).unwrap_err();
        assert!(matches!(err, CortexError::Validation(_)));

        let err = store
            .remember(&tenant, &NewMemory::new("ok").with_importance(11))
            .unwrap_err();
        assert!(matches!(err, CortexError::Validation(_)));
        assert_eq!(store.stats(&tenant).unwrap().total_memories, 0);
    }

    #[test]
    fn test_provider_failure_does_not_fail_write() {
        let store = MemoryStore::new(Storage::open_in_memory().unwrap(), Arc::new(OfflineEmbedder));
        let tenant = Tenant::new("app", "user");

        let memory = store.remember(&tenant, &NewMemory::new("Allergic to peanuts")).unwrap();
        assert!(!memory.has_embedding);

        let results = store.search(&tenant, &SearchRequest::new("peanuts")).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.id, memory.id);
    }

    #[test]
    fn test_update_versions_and_reembeds() {
        let store = store();
        let tenant = Tenant::new("app", "user");

        let mut memory = store.remember(&tenant, &NewMemory::new("Lives in Lisbon")).unwrap();
        memory.content = "Lives in Porto".to_string();
        let updated = store.update(&memory).unwrap();

        assert_eq!(updated.content, "Lives in Porto");
        assert!(updated.has_embedding);

        let versions = store.versions(&tenant, memory.id).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].content, "Lives in Lisbon");
        assert_eq!(versions[0].changed_by, CHANGED_BY_API);
    }

    #[test]
    fn test_queued_write_leaves_embedding_pending() {
        let queue = EmbeddingQueue::new(8);
        let store = store().with_queue(queue.clone());
        let tenant = Tenant::new("app", "user");

        let memory = store.remember(&tenant, &NewMemory::new("Speaks Portuguese")).unwrap();
        assert!(!memory.has_embedding);
        assert_eq!(queue.len(), 1);

        assert_eq!(store.backfill_embeddings(0).unwrap(), 1);
        assert!(store.get(&tenant, memory.id).unwrap().has_embedding);
    }

    #[test]
    fn test_update_rejects_out_of_range_importance() {
        let store = store();
        let tenant = Tenant::new("app", "user");

        let mut memory = store
            .remember(&tenant, &NewMemory::new("Vegetarian").with_importance(7))
            .unwrap();

        for importance in [0, 11, 99] {
            memory.importance = importance;
            let err = store.update(&memory).unwrap_err();
            assert!(matches!(err, CortexError::Validation(_)));
        }

        assert_eq!(store.get(&tenant, memory.id).unwrap().importance, 7);
        assert!(store.versions(&tenant, memory.id).unwrap().is_empty());

        memory.importance = 10;
        assert_eq!(store.update(&memory).unwrap().importance, 10);
    }

    #[test]
    fn test_entity_facts_and_relations() {
        let store = store();
        let tenant = Tenant::new("app", "user");

        let memory = store
            .remember(&tenant, &NewMemory::new("Alice moved to Lisbon").with_entity("Alice"))
            .unwrap();
        store
            .set_fact(&tenant, "Alice", "city", serde_json::json!("Lisbon"))
            .unwrap();
        store.add_relation(&tenant, "Alice", "Bob", "sibling").unwrap();
        store.add_relation(&tenant, "Alice", "Bob", "sibling").unwrap();

        let entity = store
            .get_entity(&tenant, memory.entity.as_deref().unwrap())
            .unwrap();
        assert_eq!(entity.data.get("city"), Some(&serde_json::json!("Lisbon")));
        assert_eq!(store.relations(&tenant, Some("Bob")).unwrap().len(), 1);

        let stats = store.stats(&tenant).unwrap();
        assert_eq!(stats.total_entities, 1);
        assert_eq!(stats.total_relations, 1);

        let other = Tenant::new("app", "other");
        assert!(store.get_entity(&other, "Alice").unwrap_err().is_not_found());
        assert!(store.relations(&other, None).unwrap().is_empty());
    }

    fn stored_vector(store: &MemoryStore, id: MemoryId) -> Vec<f32> {
        let encoded: String = store
            .storage()
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT embedding FROM memories WHERE id = ?", [id], |row| {
                    row.get(0)
                })?)
            })
            .unwrap();
        embedding::decode_vector(&encoded).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_edit_while_queued_embeds_latest_content() {
        let queue = EmbeddingQueue::new(8);
        let store = store().with_queue(queue.clone());
        let tenant = Tenant::new("app", "user");

        let mut memory = store
            .remember(&tenant, &NewMemory::new("Loves espresso in the morning"))
            .unwrap();
        memory.content = "https://example.com/cat.png".to_string();
        memory.content_type = "image/png".to_string();
        let updated = store.update(&memory).unwrap();
        assert!(!updated.has_embedding);
        assert_eq!(queue.len(), 2);

        queue.close();
        EmbeddingWorker::new(store.embedder(), store.storage().clone(), &queue, 8)
            .run()
            .await;

        let stored = store.get(&tenant, memory.id).unwrap();
        assert!(stored.has_embedding);
        assert_eq!(stored.content_type, "image/png");

        let embedder = HashEmbedder::default();
        let latest = embedder.embed("https://example.com/cat.png", "image/png").unwrap();
        let original = embedder.embed("Loves espresso in the morning", "text/plain").unwrap();
        let vector = stored_vector(&store, memory.id);
        assert_eq!(vector, latest);
        assert_ne!(vector, original);
    }

    #[tokio::test]
    async fn test_stale_request_in_later_batch_is_discarded() {
        let queue = EmbeddingQueue::new(8);
        let store = store().with_queue(queue.clone());
        let tenant = Tenant::new("app", "user");

        let mut memory = store.remember(&tenant, &NewMemory::new("Cycles to work")).unwrap();
        let stale = EmbeddingRequest::from(&memory);
        memory.content = "Takes the metro to work".to_string();
        store.update(&memory).unwrap();

        // One request per batch: the queue now holds old, new, old
        let worker = EmbeddingWorker::new(store.embedder(), store.storage().clone(), &queue, 1);
        queue.queue(stale).await.unwrap();
        queue.close();
        worker.run().await;

        let vector = stored_vector(&store, memory.id);
        let latest = HashEmbedder::default()
            .embed("Takes the metro to work", "text/plain")
            .unwrap();
        assert_eq!(vector, latest);
    }

    #[test]
    fn test_forget_and_bundles() {
        let store = store();
        let tenant = Tenant::new("app", "user");

        let bundle = store.create_bundle(&tenant, "Travel").unwrap();
        let memory = store
            .remember(&tenant, &NewMemory::new("Aisle seat on long flights").with_bundle(bundle.id))
            .unwrap();

        store.delete_bundle(&tenant, bundle.id).unwrap();
        assert!(store.list_bundles(&tenant).unwrap().is_empty());
        assert_eq!(store.get(&tenant, memory.id).unwrap().bundle_id, None);

        store.forget(&tenant, memory.id).unwrap();
        assert!(store.get(&tenant, memory.id).unwrap_err().is_not_found());
        assert!(store.list(&tenant, 0, 0, true).unwrap().is_empty());
    }
}
