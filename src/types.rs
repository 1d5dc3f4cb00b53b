//! Core types for Cortex

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{CortexError, Result};

/// Unique identifier for a memory
pub type MemoryId = i64;

/// Unique identifier for a bundle
pub type BundleId = i64;

pub type EntityId = i64;
pub type RelationId = i64;

/// Memory type assigned when the caller does not classify the memory
pub const DEFAULT_MEMORY_TYPE: &str = "semantic";

/// Importance assigned when the caller does not provide one
pub const DEFAULT_IMPORTANCE: i32 = 5;

pub const MIN_IMPORTANCE: i32 = 1;
pub const MAX_IMPORTANCE: i32 = 10;

/// Content type assumed for plain text memories
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Metadata key written on a memory that was merged into another one
pub const MERGED_INTO_KEY: &str = "merged_into";

/// Clamp an importance score into the accepted 1..=10 range
pub fn clamp_importance(importance: i32) -> i32 {
    importance.clamp(MIN_IMPORTANCE, MAX_IMPORTANCE)
}

fn validate_importance(importance: i32) -> Result<()> {
    if !(MIN_IMPORTANCE..=MAX_IMPORTANCE).contains(&importance) {
        return Err(CortexError::Validation(format!(
            "importance must be between {} and {}, got {}",
            MIN_IMPORTANCE, MAX_IMPORTANCE, importance
        )));
    }
    Ok(())
}

fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(CortexError::Validation(
            "content must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Tenant key scoping every memory, bundle and query
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tenant {
    /// Application identifier
    pub app_id: String,
    /// External user identifier within the application
    pub user_id: String,
}

impl Tenant {
    pub fn new(app_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl std::fmt::Display for Tenant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.app_id, self.user_id)
    }
}

/// Lifecycle status of a memory.
///
/// Transitions only go from `Active` to `Archived`; archived rows are excluded
/// from default queries and may later be hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    #[default]
    Active,
    Archived,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Active => "active",
            MemoryStatus::Archived => "archived",
        }
    }
}

impl std::fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            // Rows written before statuses existed carry an empty status
            "active" | "" => Ok(MemoryStatus::Active),
            "archived" => Ok(MemoryStatus::Archived),
            _ => Err(format!("Unknown memory status: {}", s)),
        }
    }
}

/// Opaque key/value metadata attached to a memory.
///
/// The interior is an arbitrary JSON object; only the `merged_into` marker,
/// the content type hint and equality filters are interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse stored metadata; empty or malformed text yields empty metadata
    pub fn from_json_str(s: &str) -> Self {
        if s.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str::<Map<String, Value>>(s) {
            Ok(map) => Self(map),
            Err(e) => {
                tracing::debug!("Ignoring malformed metadata: {}", e);
                Self::default()
            }
        }
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Copy keys from `other` that are absent here; existing keys win
    pub fn merge_missing(&mut self, other: &Metadata) {
        for (key, value) in other.iter() {
            if !self.0.contains_key(key) {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    /// Id of the memory this one was merged into, if any
    pub fn merged_into(&self) -> Option<MemoryId> {
        match self.0.get(MERGED_INTO_KEY)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn set_merged_into(&mut self, keep_id: MemoryId) {
        self.0.insert(MERGED_INTO_KEY.to_string(), Value::from(keep_id));
    }

    /// Explicit content type supplied by the caller (`contentType` or `content_type`)
    pub fn content_type_hint(&self) -> Option<&str> {
        self.0
            .get("contentType")
            .or_else(|| self.0.get("content_type"))
            .and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Split a comma-separated tag string, trimming and dropping empty entries
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Join tags into the stored comma-separated form
pub fn join_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// A memory entry in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier
    pub id: MemoryId,
    /// Owning tenant
    #[serde(flatten)]
    pub tenant: Tenant,
    /// Main content of the memory
    pub content: String,
    /// Free-form classification (default "semantic")
    #[serde(rename = "type")]
    pub memory_type: String,
    /// Importance score (1 - 10)
    pub importance: i32,
    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,
    /// Entity this memory is about
    pub entity: Option<String>,
    /// Optional bundle grouping
    pub bundle_id: Option<BundleId>,
    /// Arbitrary metadata as JSON
    #[serde(default)]
    pub metadata: Metadata,
    /// Content type classification (e.g. "text/plain", "image/png")
    pub content_type: String,
    /// Whether an embedding has been stored for this memory
    #[serde(default)]
    pub has_embedding: bool,
    /// Lifecycle status
    #[serde(default)]
    pub status: MemoryStatus,
    /// When the memory should be archived
    pub expires_at: Option<DateTime<Utc>>,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last updated (None if never updated)
    pub updated_at: Option<DateTime<Utc>>,
}

impl Memory {
    pub fn is_active(&self) -> bool {
        self.status == MemoryStatus::Active
    }

    /// Last modification time, falling back to creation time
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Check caller-editable fields before an update is written
    pub fn validate(&self) -> Result<()> {
        validate_content(&self.content)?;
        validate_importance(self.importance)
    }
}

/// Input for creating a new memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMemory {
    pub content: String,
    #[serde(default, rename = "type")]
    pub memory_type: Option<String>,
    #[serde(default)]
    pub importance: Option<i32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub bundle_id: Option<BundleId>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Explicit content type; detected from content and metadata when absent
    #[serde(default)]
    pub content_type: Option<String>,
    /// Initial status; `Active` when absent
    #[serde(default)]
    pub status: Option<MemoryStatus>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_importance(mut self, importance: i32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_bundle(mut self, bundle_id: BundleId) -> Self {
        self.bundle_id = Some(bundle_id);
        self
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Reject empty content and out-of-range importance
    pub fn validate(&self) -> Result<()> {
        validate_content(&self.content)?;
        match self.importance {
            Some(importance) => validate_importance(importance),
            None => Ok(()),
        }
    }
}

/// Immutable snapshot of a memory taken right before it was updated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryVersion {
    pub id: i64,
    pub memory_id: MemoryId,
    /// Per-memory version number, starting at 1
    pub version: i32,
    pub content: String,
    pub metadata: Metadata,
    pub importance: i32,
    pub tags: Vec<String>,
    pub entity: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: String,
    /// Origin of the change ("api", "merge", "import", ...)
    pub changed_by: String,
    pub created_at: DateTime<Utc>,
}

/// Named grouping of memories within a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub id: BundleId,
    pub name: String,
    #[serde(flatten)]
    pub tenant: Tenant,
    pub created_at: DateTime<Utc>,
}

/// Named subject that memories can point at through `Memory::entity`
///
/// `data` holds free-form facts keyed by name, e.g. `{"city": "Lisbon"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(flatten)]
    pub tenant: Tenant,
    /// Unique within the tenant
    pub name: String,
    pub data: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Directed, typed edge between two entity names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    #[serde(flatten)]
    pub tenant: Tenant,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub relation_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Optional restrictions shared by text search and semantic candidate loading
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    /// Restrict to one bundle
    pub bundle_id: Option<BundleId>,
    /// Restrict to a set of ids (empty = no restriction)
    pub ids: Vec<MemoryId>,
    /// Equality filters on metadata keys
    pub metadata: Metadata,
    /// Include archived memories
    pub include_archived: bool,
}

/// Substring query over memory content
#[derive(Debug, Clone, Default)]
pub struct TextQuery {
    pub query: String,
    pub limit: usize,
    pub filter: MemoryFilter,
}

impl TextQuery {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
            filter: MemoryFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: MemoryFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// A pair of near-duplicate memories; `keep_id < merge_id`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarPair {
    pub keep_id: MemoryId,
    pub merge_id: MemoryId,
    pub similarity: f32,
}

/// Basic per-tenant statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantStats {
    pub total_memories: i64,
    pub active_memories: i64,
    pub archived_memories: i64,
    pub memories_with_embeddings: i64,
    pub total_bundles: i64,
    pub total_entities: i64,
    pub total_relations: i64,
    pub memories_by_type: BTreeMap<String, i64>,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database
    pub db_path: String,
    /// Storage mode (local or cloud-safe)
    #[serde(default)]
    pub storage_mode: StorageMode,
}

impl StorageConfig {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            storage_mode: StorageMode::default(),
        }
    }
}

/// Storage mode for database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    /// WAL mode for local disks
    #[default]
    Local,
    /// DELETE journal for folders synced by Dropbox, iCloud and similar
    CloudSafe,
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageMode::Local),
            "cloud-safe" | "cloud_safe" => Ok(StorageMode::CloudSafe),
            _ => Err(format!("Unknown storage mode: {}", s)),
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend to use: "hash" or "openai"
    pub model: String,
    /// API key (for openai model)
    pub api_key: Option<String>,
    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,
    /// Remote model name override (e.g. "text-embedding-3-small")
    pub embedding_model: Option<String>,
    /// Embedding dimensions (must match model output)
    pub dimensions: usize,
    /// Batch size for the async queue
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    100
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "hash".to_string(),
            api_key: None,
            base_url: None,
            embedding_model: None,
            dimensions: 384,
            batch_size: default_batch_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_join_tags() {
        assert_eq!(parse_tags(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(parse_tags("").is_empty());
        assert_eq!(join_tags(&["x".to_string(), " ".to_string(), "y".to_string()]), "x,y");
    }

    #[test]
    fn test_metadata_merge_missing_keeps_existing() {
        let mut keep: Metadata = [("a".to_string(), json!(1)), ("b".to_string(), json!("keep"))]
            .into_iter()
            .collect();
        let other: Metadata = [("b".to_string(), json!("other")), ("c".to_string(), json!(true))]
            .into_iter()
            .collect();

        keep.merge_missing(&other);

        assert_eq!(keep.get("a"), Some(&json!(1)));
        assert_eq!(keep.get("b"), Some(&json!("keep")));
        assert_eq!(keep.get("c"), Some(&json!(true)));
    }

    #[test]
    fn test_merged_into_marker() {
        let mut meta = Metadata::new();
        assert_eq!(meta.merged_into(), None);
        meta.set_merged_into(7);
        assert_eq!(meta.merged_into(), Some(7));

        // Older rows stored the marker as a float
        let legacy = Metadata::from_json_str(r#"{"merged_into": 12.0}"#);
        assert_eq!(legacy.merged_into(), Some(12));
    }

    #[test]
    fn test_malformed_metadata_is_empty() {
        assert!(Metadata::from_json_str("not json").is_empty());
        assert!(Metadata::from_json_str("").is_empty());
        assert!(Metadata::from_json_str("[1,2]").is_empty());
    }

    #[test]
    fn test_new_memory_validation() {
        assert!(NewMemory::new("hello").validate().is_ok());
        assert!(matches!(
            NewMemory::new("   ").validate(),
            Err(CortexError::Validation(_))
        ));
        assert!(NewMemory::new("x").with_importance(11).validate().is_err());
        assert!(NewMemory::new("x").with_importance(0).validate().is_err());
        assert!(NewMemory::new("x").with_importance(10).validate().is_ok());
    }

    #[test]
    fn test_clamp_importance() {
        assert_eq!(clamp_importance(-3), 1);
        assert_eq!(clamp_importance(7), 7);
        assert_eq!(clamp_importance(42), 10);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("archived".parse::<MemoryStatus>(), Ok(MemoryStatus::Archived));
        assert_eq!("".parse::<MemoryStatus>(), Ok(MemoryStatus::Active));
        assert!("deleted".parse::<MemoryStatus>().is_err());
    }
}
