//! Cortex - embedded memory store for AI agents
//!
//! Tenant-scoped memories with vector embeddings, semantic search with a
//! text fallback, and background lifecycle maintenance (TTL archival,
//! duplicate merging, cleanup of old archived rows).

pub mod embedding;
pub mod error;
pub mod lifecycle;
pub mod search;
pub mod storage;
pub mod store;
pub mod types;

pub use embedding::{create_embedder, Embedder, HashEmbedder, LazyEmbedder};
pub use error::{CortexError, Result};
pub use lifecycle::{
    CancelToken, LifecycleEngine, MaintenanceConfig, MaintenanceStats, MaintenanceWorker,
};
pub use search::{MatchSource, ScoredMemory, SearchEngine, SearchRequest};
pub use storage::Storage;
pub use store::MemoryStore;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
