//! Async embedding queue with batch processing
//!
//! Embeddings are computed in the background so writes never wait on the
//! embedding backend. A memory is searchable by text as soon as it is
//! committed and joins semantic search once its vector is stored.

use async_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use super::{encode_vector, Embedder};
use crate::error::{CortexError, Result};
use crate::storage::{queries, Storage};
use crate::types::{Memory, MemoryId, Tenant};

/// Batch size used by [`backfill_embeddings`] when none is given
pub const DEFAULT_BACKFILL_BATCH: usize = 10;

/// Message for the embedding queue
#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub memory_id: MemoryId,
    pub tenant: Tenant,
    pub content: String,
    pub content_type: String,
}

impl From<&Memory> for EmbeddingRequest {
    fn from(memory: &Memory) -> Self {
        Self {
            memory_id: memory.id,
            tenant: memory.tenant.clone(),
            content: memory.content.clone(),
            content_type: memory.content_type.clone(),
        }
    }
}

/// Embedding queue for async processing
#[derive(Clone)]
pub struct EmbeddingQueue {
    sender: Sender<EmbeddingRequest>,
    receiver: Receiver<EmbeddingRequest>,
}

impl EmbeddingQueue {
    /// Create a new embedding queue holding at most `capacity` pending requests
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// Queue a memory for embedding
    pub async fn queue(&self, request: EmbeddingRequest) -> Result<()> {
        self.sender
            .send(request)
            .await
            .map_err(|e| CortexError::Internal(format!("Queue send error: {}", e)))
    }

    /// Queue without waiting; fails when the queue is full or closed
    pub fn try_queue(&self, request: EmbeddingRequest) -> Result<()> {
        self.sender.try_send(request).map_err(|e| match e {
            TrySendError::Full(r) => CortexError::Internal(format!(
                "Embedding queue full, dropping memory {}",
                r.memory_id
            )),
            TrySendError::Closed(r) => CortexError::Internal(format!(
                "Embedding queue closed, dropping memory {}",
                r.memory_id
            )),
        })
    }

    /// Stop accepting requests; the worker drains what is left and exits
    pub fn close(&self) {
        self.sender.close();
    }

    /// Get queue length
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Get receiver for worker
    pub fn receiver(&self) -> Receiver<EmbeddingRequest> {
        self.receiver.clone()
    }
}

/// Background worker for processing embeddings
pub struct EmbeddingWorker {
    embedder: Arc<dyn Embedder>,
    storage: Storage,
    receiver: Receiver<EmbeddingRequest>,
    batch_size: usize,
    batch_timeout: Duration,
}

impl EmbeddingWorker {
    /// Create a new embedding worker
    pub fn new(
        embedder: Arc<dyn Embedder>,
        storage: Storage,
        queue: &EmbeddingQueue,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            storage,
            receiver: queue.receiver(),
            batch_size: batch_size.max(1),
            batch_timeout: Duration::from_secs(5),
        }
    }

    /// Flush partial batches after this long (default 5s)
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Run the worker until the queue is closed (call in a spawned task)
    pub async fn run(&self) {
        let mut batch: Vec<EmbeddingRequest> = Vec::with_capacity(self.batch_size);
        let mut batch_timer = interval(self.batch_timeout);

        loop {
            tokio::select! {
                received = self.receiver.recv() => match received {
                    Ok(request) => {
                        batch.push(request);
                        if batch.len() >= self.batch_size {
                            self.process_batch(&mut batch);
                        }
                    }
                    Err(_) => {
                        self.process_batch(&mut batch);
                        tracing::debug!("Embedding queue closed, worker exiting");
                        break;
                    }
                },

                // Process on timeout even if batch isn't full
                _ = batch_timer.tick() => {
                    self.process_batch(&mut batch);
                }
            }
        }
    }

    /// Process a batch of embedding requests
    ///
    /// Provider failures are logged and the batch is dropped; the rows keep an
    /// empty embedding and can be picked up by a later backfill.
    fn process_batch(&self, batch: &mut Vec<EmbeddingRequest>) {
        if batch.is_empty() {
            return;
        }

        // Only the newest request per memory carries its current content
        let requests: Vec<EmbeddingRequest> = batch.drain(..).collect();
        let mut newest: HashMap<MemoryId, usize> = HashMap::with_capacity(requests.len());
        for (index, request) in requests.iter().enumerate() {
            newest.insert(request.memory_id, index);
        }
        let superseded = requests.len() - newest.len();
        if superseded > 0 {
            tracing::debug!(superseded, "Dropping superseded embedding requests");
        }

        // One provider call per content type
        let mut groups: BTreeMap<String, Vec<EmbeddingRequest>> = BTreeMap::new();
        for (index, request) in requests.into_iter().enumerate() {
            if newest.get(&request.memory_id) != Some(&index) {
                continue;
            }
            groups
                .entry(request.content_type.clone())
                .or_default()
                .push(request);
        }

        let mut stored = 0usize;
        for (content_type, requests) in groups {
            let contents: Vec<&str> = requests.iter().map(|r| r.content.as_str()).collect();

            let embeddings = match self.embedder.embed_batch(&contents, &content_type) {
                Ok(embeddings) => embeddings,
                Err(e) => {
                    tracing::warn!(
                        count = requests.len(),
                        "Embedding batch failed, leaving memories without embeddings: {}",
                        e
                    );
                    continue;
                }
            };

            for (request, embedding) in requests.iter().zip(embeddings.iter()) {
                match store_embedding(
                    &self.storage,
                    request.memory_id,
                    &request.tenant,
                    &request.content,
                    embedding,
                    &content_type,
                ) {
                    Ok(true) => stored += 1,
                    Ok(false) => tracing::debug!(
                        memory_id = request.memory_id,
                        "Memory changed while queued, discarding stale embedding"
                    ),
                    // The memory may have been deleted while queued
                    Err(e) => tracing::debug!(
                        memory_id = request.memory_id,
                        "Could not store embedding: {}",
                        e
                    ),
                }
            }
        }

        if stored > 0 {
            tracing::info!("Processed {} embeddings", stored);
        }
    }
}

/// Store a vector computed from `content`; `false` if the row has moved on
fn store_embedding(
    storage: &Storage,
    memory_id: MemoryId,
    tenant: &Tenant,
    content: &str,
    embedding: &[f32],
    content_type: &str,
) -> Result<bool> {
    let encoded = encode_vector(embedding)?;
    storage.with_connection(|conn| {
        queries::set_embedding_if_current(conn, memory_id, tenant, content, &encoded, content_type)
    })
}

/// Generate embeddings for up to `batch_size` memories that have none
///
/// A batch size of 0 means [`DEFAULT_BACKFILL_BATCH`]. Memories are embedded
/// in one provider call per content type; if that call fails each memory is
/// retried alone and failures are logged and skipped. Returns the number of
/// embeddings stored.
pub fn backfill_embeddings(
    storage: &Storage,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<usize> {
    let batch_size = if batch_size == 0 {
        DEFAULT_BACKFILL_BATCH
    } else {
        batch_size
    };

    let pending = storage.with_connection(|conn| queries::memories_without_embedding(conn, batch_size))?;
    if pending.is_empty() {
        return Ok(0);
    }

    let mut groups: BTreeMap<&str, Vec<&Memory>> = BTreeMap::new();
    for memory in &pending {
        groups
            .entry(memory.content_type.as_str())
            .or_default()
            .push(memory);
    }

    let mut stored = 0usize;
    for (content_type, memories) in groups {
        let contents: Vec<&str> = memories.iter().map(|m| m.content.as_str()).collect();

        let embeddings: Vec<Option<Vec<f32>>> = match embedder.embed_batch(&contents, content_type) {
            Ok(embeddings) if embeddings.len() == memories.len() => {
                embeddings.into_iter().map(Some).collect()
            }
            Ok(_) | Err(_) => memories
                .iter()
                .map(|m| match embedder.embed(&m.content, content_type) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        tracing::warn!(memory_id = m.id, "Backfill embedding failed: {}", e);
                        None
                    }
                })
                .collect(),
        };

        for (memory, embedding) in memories.iter().zip(embeddings) {
            let Some(embedding) = embedding else { continue };
            match store_embedding(
                storage,
                memory.id,
                &memory.tenant,
                &memory.content,
                &embedding,
                content_type,
            ) {
                Ok(true) => stored += 1,
                Ok(false) => tracing::debug!(memory_id = memory.id, "Memory changed during backfill"),
                Err(e) => tracing::warn!(memory_id = memory.id, "Backfill store failed: {}", e),
            }
        }
    }

    tracing::info!(stored, pending = pending.len(), "Embedding backfill finished");
    Ok(stored)
}
