//! Database queries for memory operations
//!
//! Every function is scoped by [`Tenant`] unless it is one of the global
//! maintenance operations (bulk archival, deletion, backfill).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::collections::{BTreeMap, HashSet};

use super::{format_timestamp, parse_timestamp};
use crate::embedding::{cosine_similarity, decode_vector, detect_content_type};
use crate::error::{CortexError, Result};
use crate::types::*;

/// Page size used when a listing asks for zero or a negative limit
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Largest page a listing may return
pub const MAX_LIST_LIMIT: i64 = 100;

/// Separator placed between contents when two memories are merged
pub const MERGE_SEPARATOR: &str = " | ";

/// Change origin recorded on versions written by a merge
pub const CHANGED_BY_MERGE: &str = "merge";

const MEMORY_COLUMNS: &str = "id, app_id, external_user_id, content, type, importance, tags, \
     entity, bundle_id, metadata, content_type, (embedding != '') AS has_embedding, status, \
     expires_at, created_at, updated_at";

/// Parse a memory from a database row
pub fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let tags: String = row.get("tags")?;
    let metadata: String = row.get("metadata")?;
    let status: String = row.get("status")?;
    let expires_at: Option<String> = row.get("expires_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: Option<String> = row.get("updated_at")?;

    Ok(Memory {
        id: row.get("id")?,
        tenant: Tenant {
            app_id: row.get("app_id")?,
            user_id: row.get("external_user_id")?,
        },
        content: row.get("content")?,
        memory_type: row.get("type")?,
        importance: row.get("importance")?,
        tags: parse_tags(&tags),
        entity: row.get("entity")?,
        bundle_id: row.get("bundle_id")?,
        metadata: Metadata::from_json_str(&metadata),
        content_type: row.get("content_type")?,
        has_embedding: row.get("has_embedding")?,
        status: status.parse().unwrap_or_default(),
        expires_at: expires_at.as_deref().and_then(parse_timestamp),
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        updated_at: updated_at.as_deref().and_then(parse_timestamp),
    })
}

fn version_from_row(row: &Row) -> rusqlite::Result<MemoryVersion> {
    let tags: String = row.get("tags")?;
    let metadata: String = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;

    Ok(MemoryVersion {
        id: row.get("id")?,
        memory_id: row.get("memory_id")?,
        version: row.get("version")?,
        content: row.get("content")?,
        metadata: Metadata::from_json_str(&metadata),
        importance: row.get("importance")?,
        tags: parse_tags(&tags),
        entity: row.get("entity")?,
        memory_type: row.get("type")?,
        changed_by: row.get("changed_by")?,
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
    })
}

/// Whether a metadata key may be interpolated into a JSON path.
///
/// Allows ASCII letters, digits, `_`, `-` and `.`; the key must be non-empty.
pub fn is_safe_metadata_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Escape `LIKE` wildcards so the query matches literally
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    for c in query.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn tenant_conditions(
    tenant: &Tenant,
    include_archived: bool,
    conditions: &mut Vec<String>,
    params: &mut Vec<Box<dyn ToSql>>,
) {
    conditions.push("app_id = ?".to_string());
    params.push(Box::new(tenant.app_id.clone()));
    conditions.push("external_user_id = ?".to_string());
    params.push(Box::new(tenant.user_id.clone()));
    if !include_archived {
        conditions.push("status = 'active'".to_string());
    }
}

fn metadata_value_to_param(
    key: &str,
    value: &serde_json::Value,
    conditions: &mut Vec<String>,
    params: &mut Vec<Box<dyn ToSql>>,
) -> Result<()> {
    if !is_safe_metadata_key(key) {
        return Err(CortexError::Validation(format!(
            "Invalid metadata filter key: {:?}",
            key
        )));
    }
    let path = format!("$.{}", key);

    match value {
        serde_json::Value::String(s) => {
            conditions.push("json_extract(metadata, ?) = ?".to_string());
            params.push(Box::new(path));
            params.push(Box::new(s.clone()));
        }
        serde_json::Value::Number(n) => {
            conditions.push("json_extract(metadata, ?) = ?".to_string());
            params.push(Box::new(path));
            if let Some(i) = n.as_i64() {
                params.push(Box::new(i));
            } else if let Some(f) = n.as_f64() {
                params.push(Box::new(f));
            } else {
                return Err(CortexError::Validation("Invalid number".to_string()));
            }
        }
        serde_json::Value::Bool(b) => {
            conditions.push("json_extract(metadata, ?) = ?".to_string());
            params.push(Box::new(path));
            params.push(Box::new(*b));
        }
        serde_json::Value::Null => {
            conditions.push("json_extract(metadata, ?) IS NULL".to_string());
            params.push(Box::new(path));
        }
        _ => {
            return Err(CortexError::Validation(format!(
                "Unsupported metadata filter value for key: {}",
                key
            )));
        }
    }

    Ok(())
}

fn filter_conditions(
    filter: &MemoryFilter,
    conditions: &mut Vec<String>,
    params: &mut Vec<Box<dyn ToSql>>,
) -> Result<()> {
    if let Some(bundle_id) = filter.bundle_id {
        conditions.push("bundle_id = ?".to_string());
        params.push(Box::new(bundle_id));
    }

    if !filter.ids.is_empty() {
        let placeholders: Vec<&str> = filter.ids.iter().map(|_| "?").collect();
        conditions.push(format!("id IN ({})", placeholders.join(", ")));
        for id in &filter.ids {
            params.push(Box::new(*id));
        }
    }

    for (key, value) in filter.metadata.iter() {
        metadata_value_to_param(key, value, conditions, params)?;
    }

    Ok(())
}

fn query_memories(conn: &Connection, sql: &str, params: &[Box<dyn ToSql>]) -> Result<Vec<Memory>> {
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(sql)?;
    let memories = stmt
        .query_map(param_refs.as_slice(), memory_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(memories)
}

/// Create a memory for a tenant
///
/// Missing fields take their defaults: type "semantic", importance 5,
/// status active, and a content type detected from content and metadata.
pub fn create_memory(conn: &Connection, tenant: &Tenant, input: &NewMemory) -> Result<Memory> {
    if input.content.trim().is_empty() {
        return Err(CortexError::Validation(
            "content must not be empty".to_string(),
        ));
    }

    let now = format_timestamp(&Utc::now());
    let memory_type = input
        .memory_type
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MEMORY_TYPE.to_string());
    let importance = input.importance.unwrap_or(DEFAULT_IMPORTANCE);
    let content_type = input
        .content_type
        .clone()
        .unwrap_or_else(|| detect_content_type(&input.content, &input.metadata));
    let status = input.status.unwrap_or_default();
    let metadata_json = input.metadata.to_json_string()?;
    let expires_at = input.expires_at.as_ref().map(format_timestamp);

    conn.execute(
        "INSERT INTO memories (app_id, external_user_id, content, type, importance, tags, entity,
                               bundle_id, metadata, content_type, embedding, status, expires_at,
                               created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '', ?, ?, ?)",
        params![
            tenant.app_id,
            tenant.user_id,
            input.content,
            memory_type,
            importance,
            join_tags(&input.tags),
            input.entity,
            input.bundle_id,
            metadata_json,
            content_type,
            status.as_str(),
            expires_at,
            now,
        ],
    )?;

    let id = conn.last_insert_rowid();
    get_memory(conn, id, tenant, true)
}

/// Get a memory by id within a tenant
///
/// Returns `NotFound` when the id does not exist, belongs to another tenant,
/// or is archived while `include_archived` is false.
pub fn get_memory(
    conn: &Connection,
    id: MemoryId,
    tenant: &Tenant,
    include_archived: bool,
) -> Result<Memory> {
    let status_clause = if include_archived {
        ""
    } else {
        " AND status = 'active'"
    };
    let sql = format!(
        "SELECT {} FROM memories WHERE id = ? AND app_id = ? AND external_user_id = ?{}",
        MEMORY_COLUMNS, status_clause
    );

    conn.query_row(
        &sql,
        params![id, tenant.app_id, tenant.user_id],
        memory_from_row,
    )
    .optional()?
    .ok_or_else(|| CortexError::memory_not_found(id))
}

/// Substring search over content, most recent first
///
/// Matching uses SQLite `LIKE`, which is case-insensitive for ASCII letters
/// only. `%` and `_` in the query match literally. A limit of 0 returns all
/// matches.
pub fn search_text(conn: &Connection, tenant: &Tenant, query: &TextQuery) -> Result<Vec<Memory>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    tenant_conditions(tenant, query.filter.include_archived, &mut conditions, &mut params);

    if !query.query.is_empty() {
        conditions.push("content LIKE ? ESCAPE '\\'".to_string());
        params.push(Box::new(format!("%{}%", escape_like(&query.query))));
    }

    filter_conditions(&query.filter, &mut conditions, &mut params)?;

    let sql = format!(
        "SELECT {} FROM memories WHERE {} ORDER BY created_at DESC, id DESC LIMIT ?",
        MEMORY_COLUMNS,
        conditions.join(" AND ")
    );
    let limit: i64 = if query.limit == 0 { -1 } else { query.limit as i64 };
    params.push(Box::new(limit));

    query_memories(conn, &sql, &params)
}

/// Load tenant memories that carry an embedding, with the raw encoded vector
///
/// Ordered most recent first so ties in later ranking keep that order.
pub fn load_embedded_candidates(
    conn: &Connection,
    tenant: &Tenant,
    filter: &MemoryFilter,
) -> Result<Vec<(Memory, String)>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    tenant_conditions(tenant, filter.include_archived, &mut conditions, &mut params);
    conditions.push("embedding != ''".to_string());
    filter_conditions(filter, &mut conditions, &mut params)?;

    let sql = format!(
        "SELECT {}, embedding FROM memories WHERE {} ORDER BY created_at DESC, id DESC",
        MEMORY_COLUMNS,
        conditions.join(" AND ")
    );

    let param_refs: Vec<&dyn ToSql> = params.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            let embedding: String = row.get("embedding")?;
            Ok((memory_from_row(row)?, embedding))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

/// List memories for a tenant, newest first
///
/// A limit of zero or less means [`DEFAULT_LIST_LIMIT`]; limits above
/// [`MAX_LIST_LIMIT`] are capped and negative offsets start at 0. The stored
/// vector is never returned; `has_embedding` reports whether one exists.
pub fn list_memories(
    conn: &Connection,
    tenant: &Tenant,
    limit: i64,
    offset: i64,
    include_archived: bool,
) -> Result<Vec<Memory>> {
    let limit = if limit <= 0 {
        DEFAULT_LIST_LIMIT
    } else {
        limit.min(MAX_LIST_LIMIT)
    };
    let offset = offset.max(0);

    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();
    tenant_conditions(tenant, include_archived, &mut conditions, &mut params);

    let sql = format!(
        "SELECT {} FROM memories WHERE {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        MEMORY_COLUMNS,
        conditions.join(" AND ")
    );
    params.push(Box::new(limit));
    params.push(Box::new(offset));

    query_memories(conn, &sql, &params)
}

/// Update a memory, snapshotting its previous state first
///
/// The existing row is re-read under `memory.tenant` (archived rows
/// included). Its current state is written to `memory_versions` with the
/// next version number, then the new state is persisted with
/// `updated_at = now`. Changing the content clears the stored embedding.
/// Callers should run this inside [`Storage::with_transaction`](super::Storage::with_transaction).
pub fn update_memory(conn: &Connection, memory: &Memory, changed_by: &str) -> Result<Memory> {
    let existing = get_memory(conn, memory.id, &memory.tenant, true)?;

    if memory.content.trim().is_empty() {
        return Err(CortexError::Validation(
            "content must not be empty".to_string(),
        ));
    }
    if existing.status == MemoryStatus::Archived && memory.status == MemoryStatus::Active {
        return Err(CortexError::Validation(format!(
            "memory {} is archived and cannot be reactivated",
            memory.id
        )));
    }

    let now = format_timestamp(&Utc::now());

    conn.execute(
        "INSERT INTO memory_versions (memory_id, version, content, metadata, importance, tags,
                                      entity, type, changed_by, created_at)
         VALUES (?1,
                 (SELECT COALESCE(MAX(version), 0) + 1 FROM memory_versions WHERE memory_id = ?1),
                 ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            existing.id,
            existing.content,
            existing.metadata.to_json_string()?,
            existing.importance,
            join_tags(&existing.tags),
            existing.entity,
            existing.memory_type,
            changed_by,
            now,
        ],
    )?;

    let content_changed = existing.content != memory.content;

    conn.execute(
        "UPDATE memories
         SET content = ?1, type = ?2, importance = ?3, tags = ?4, entity = ?5, bundle_id = ?6,
             metadata = ?7, content_type = ?8, status = ?9, expires_at = ?10, updated_at = ?11,
             embedding = CASE WHEN ?12 THEN '' ELSE embedding END
         WHERE id = ?13 AND app_id = ?14 AND external_user_id = ?15",
        params![
            memory.content,
            memory.memory_type,
            memory.importance,
            join_tags(&memory.tags),
            memory.entity,
            memory.bundle_id,
            memory.metadata.to_json_string()?,
            memory.content_type,
            memory.status.as_str(),
            memory.expires_at.as_ref().map(format_timestamp),
            now,
            content_changed,
            memory.id,
            memory.tenant.app_id,
            memory.tenant.user_id,
        ],
    )?;

    get_memory(conn, memory.id, &memory.tenant, true)
}

/// Permanently delete a memory; its versions are removed with it
pub fn delete_memory(conn: &Connection, id: MemoryId, tenant: &Tenant) -> Result<()> {
    let affected = conn.execute(
        "DELETE FROM memories WHERE id = ? AND app_id = ? AND external_user_id = ?",
        params![id, tenant.app_id, tenant.user_id],
    )?;

    if affected == 0 {
        return Err(CortexError::memory_not_found(id));
    }

    Ok(())
}

/// Version history of a memory, newest first
pub fn list_versions(
    conn: &Connection,
    memory_id: MemoryId,
    tenant: &Tenant,
) -> Result<Vec<MemoryVersion>> {
    // Visibility check: archived memories keep their history
    get_memory(conn, memory_id, tenant, true)?;

    let mut stmt = conn.prepare_cached(
        "SELECT id, memory_id, version, content, metadata, importance, tags, entity, type,
                changed_by, created_at
         FROM memory_versions WHERE memory_id = ? ORDER BY version DESC",
    )?;

    let versions = stmt
        .query_map([memory_id], version_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(versions)
}

/// Archive every active memory whose `expires_at` is at or before `now`
///
/// Returns the number of memories archived (or that would be, in dry-run).
pub fn archive_expired(conn: &Connection, now: DateTime<Utc>, dry_run: bool) -> Result<i64> {
    const WHERE: &str = "status = 'active' AND expires_at IS NOT NULL AND expires_at <= ?";
    let now = format_timestamp(&now);

    if dry_run {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM memories WHERE {}", WHERE),
            params![now],
            |row| row.get(0),
        )?;
        return Ok(count);
    }

    let affected = conn.execute(
        &format!("UPDATE memories SET status = 'archived' WHERE {}", WHERE),
        params![now],
    )?;
    Ok(affected as i64)
}

/// Archive every active memory with importance below `threshold`
///
/// The threshold is clamped to 1..=10.
pub fn archive_low_importance(conn: &Connection, threshold: i32, dry_run: bool) -> Result<i64> {
    const WHERE: &str = "status = 'active' AND importance < ?";
    let threshold = clamp_importance(threshold);

    if dry_run {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM memories WHERE {}", WHERE),
            params![threshold],
            |row| row.get(0),
        )?;
        return Ok(count);
    }

    let affected = conn.execute(
        &format!("UPDATE memories SET status = 'archived' WHERE {}", WHERE),
        params![threshold],
    )?;
    Ok(affected as i64)
}

/// Hard-delete archived memories last modified before `cutoff`
///
/// Uses `updated_at`, or `created_at` for memories that were never updated.
pub fn delete_archived_before(
    conn: &Connection,
    cutoff: DateTime<Utc>,
    dry_run: bool,
) -> Result<i64> {
    const WHERE: &str = "status = 'archived' AND COALESCE(updated_at, created_at) < ?";
    let cutoff = format_timestamp(&cutoff);

    if dry_run {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM memories WHERE {}", WHERE),
            params![cutoff],
            |row| row.get(0),
        )?;
        return Ok(count);
    }

    let affected = conn.execute(
        &format!("DELETE FROM memories WHERE {}", WHERE),
        params![cutoff],
    )?;
    Ok(affected as i64)
}

/// Find near-duplicate pairs among a tenant's active embedded memories
///
/// Exhaustive pairwise scan. Each pair is reported once as
/// `(lower id, higher id)`. Scanning stops once `limit` pairs are collected;
/// a limit of 0 means no cap.
pub fn find_similar_pairs(
    conn: &Connection,
    tenant: &Tenant,
    bundle_id: Option<BundleId>,
    min_similarity: f32,
    limit: usize,
) -> Result<Vec<SimilarPair>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, embedding FROM memories
         WHERE app_id = ?1 AND external_user_id = ?2 AND status = 'active' AND embedding != ''
           AND (?3 IS NULL OR bundle_id = ?3)
         ORDER BY id",
    )?;

    let rows = stmt
        .query_map(params![tenant.app_id, tenant.user_id, bundle_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut vectors: Vec<(MemoryId, Vec<f32>)> = Vec::with_capacity(rows.len());
    for (id, raw) in rows {
        match decode_vector(&raw) {
            Ok(Some(v)) => vectors.push((id, v)),
            Ok(None) => {}
            Err(e) => tracing::debug!(memory_id = id, "Skipping undecodable embedding: {}", e),
        }
    }

    let mut seen: HashSet<(MemoryId, MemoryId)> = HashSet::new();
    let mut pairs = Vec::new();

    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            if limit > 0 && pairs.len() >= limit {
                return Ok(pairs);
            }

            let similarity = cosine_similarity(&vectors[i].1, &vectors[j].1);
            if similarity < min_similarity {
                continue;
            }

            let (a, b) = (vectors[i].0, vectors[j].0);
            let key = (a.min(b), a.max(b));
            if !seen.insert(key) {
                continue;
            }

            pairs.push(SimilarPair {
                keep_id: key.0,
                merge_id: key.1,
                similarity,
            });
        }
    }

    Ok(pairs)
}

/// Merge `merge_id` into `keep_id`
///
/// Both memories must be active and belong to the tenant. The keep memory
/// receives the joined content, missing metadata keys, the union of tags and
/// the higher importance, and is updated with a `"merge"` version. Its
/// embedding is cleared and must be regenerated by the caller. The merged
/// memory is archived with `merged_into = keep_id`; it is never deleted.
pub fn merge_memories(
    conn: &Connection,
    keep_id: MemoryId,
    merge_id: MemoryId,
    tenant: &Tenant,
) -> Result<Memory> {
    if keep_id == merge_id {
        return Err(CortexError::Validation(
            "cannot merge a memory into itself".to_string(),
        ));
    }

    let mut keep = get_memory(conn, keep_id, tenant, false)?;
    let mut merge = get_memory(conn, merge_id, tenant, false)?;

    if !merge.content.is_empty() {
        keep.content = if keep.content.is_empty() {
            merge.content.clone()
        } else {
            format!("{}{}{}", keep.content, MERGE_SEPARATOR, merge.content)
        };
    }

    keep.metadata.merge_missing(&merge.metadata);

    for tag in &merge.tags {
        if !keep.tags.contains(tag) {
            keep.tags.push(tag.clone());
        }
    }

    keep.importance = keep.importance.max(merge.importance);

    let updated = update_memory(conn, &keep, CHANGED_BY_MERGE)?;

    merge.metadata.set_merged_into(keep_id);
    conn.execute(
        "UPDATE memories SET status = 'archived', metadata = ?, updated_at = ?
         WHERE id = ? AND app_id = ? AND external_user_id = ?",
        params![
            merge.metadata.to_json_string()?,
            format_timestamp(&Utc::now()),
            merge_id,
            tenant.app_id,
            tenant.user_id,
        ],
    )?;

    Ok(updated)
}

/// Store an encoded embedding; no version is written
pub fn set_embedding(
    conn: &Connection,
    id: MemoryId,
    tenant: &Tenant,
    encoded: &str,
    content_type: &str,
) -> Result<()> {
    let affected = conn.execute(
        "UPDATE memories SET embedding = ?, content_type = ?
         WHERE id = ? AND app_id = ? AND external_user_id = ?",
        params![encoded, content_type, id, tenant.app_id, tenant.user_id],
    )?;

    if affected == 0 {
        return Err(CortexError::memory_not_found(id));
    }

    Ok(())
}

/// Store an encoded embedding only if the row still holds `content`
///
/// Returns `Ok(false)` when the memory was edited after the vector was
/// computed; the newer content gets its own embedding.
pub fn set_embedding_if_current(
    conn: &Connection,
    id: MemoryId,
    tenant: &Tenant,
    content: &str,
    encoded: &str,
    content_type: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE memories SET embedding = ?, content_type = ?
         WHERE id = ? AND app_id = ? AND external_user_id = ? AND content = ?",
        params![encoded, content_type, id, tenant.app_id, tenant.user_id, content],
    )?;

    if affected > 0 {
        return Ok(true);
    }

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM memories WHERE id = ? AND app_id = ? AND external_user_id = ?",
            params![id, tenant.app_id, tenant.user_id],
            |row| row.get(0),
        )
        .optional()?;

    match exists {
        Some(_) => Ok(false),
        None => Err(CortexError::memory_not_found(id)),
    }
}

/// Memories (any tenant, any status) still waiting for an embedding, oldest first
pub fn memories_without_embedding(conn: &Connection, limit: usize) -> Result<Vec<Memory>> {
    let sql = format!(
        "SELECT {} FROM memories WHERE embedding = '' ORDER BY id LIMIT ?",
        MEMORY_COLUMNS
    );
    let params: Vec<Box<dyn ToSql>> = vec![Box::new(limit as i64)];
    query_memories(conn, &sql, &params)
}

/// Distinct tenants owning at least one active memory with an embedding
pub fn active_tenants(conn: &Connection) -> Result<Vec<Tenant>> {
    let mut stmt = conn.prepare_cached(
        "SELECT DISTINCT app_id, external_user_id FROM memories
         WHERE status = 'active' AND embedding != ''
         ORDER BY app_id, external_user_id",
    )?;

    let tenants = stmt
        .query_map([], |row| {
            Ok(Tenant {
                app_id: row.get(0)?,
                user_id: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(tenants)
}

/// Basic counts for a tenant
pub fn get_stats(conn: &Connection, tenant: &Tenant) -> Result<TenantStats> {
    let (total_memories, active_memories, archived_memories, memories_with_embeddings): (
        i64,
        i64,
        i64,
        i64,
    ) = conn
        .query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'active'), 0),
                    COALESCE(SUM(status = 'archived'), 0),
                    COALESCE(SUM(embedding != ''), 0)
             FROM memories WHERE app_id = ? AND external_user_id = ?",
            params![tenant.app_id, tenant.user_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

    let total_bundles: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bundles WHERE app_id = ? AND external_user_id = ?",
        params![tenant.app_id, tenant.user_id],
        |row| row.get(0),
    )?;

    let (total_entities, total_relations): (i64, i64) = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM entities WHERE app_id = ?1 AND external_user_id = ?2),
                (SELECT COUNT(*) FROM relations WHERE app_id = ?1 AND external_user_id = ?2)",
        params![tenant.app_id, tenant.user_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let mut stmt = conn.prepare_cached(
        "SELECT type, COUNT(*) FROM memories
         WHERE app_id = ? AND external_user_id = ? GROUP BY type",
    )?;
    let memories_by_type: BTreeMap<String, i64> = stmt
        .query_map(params![tenant.app_id, tenant.user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<rusqlite::Result<_>>()?;

    Ok(TenantStats {
        total_memories,
        active_memories,
        archived_memories,
        memories_with_embeddings,
        total_bundles,
        total_entities,
        total_relations,
        memories_by_type,
    })
}
