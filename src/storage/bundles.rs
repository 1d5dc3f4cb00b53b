//! Bundle queries
//!
//! Bundles group memories within a tenant. Deleting a bundle detaches its
//! memories instead of deleting them.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp};
use crate::error::{CortexError, Result};
use crate::types::{Bundle, BundleId, Tenant};

fn bundle_from_row(row: &Row) -> rusqlite::Result<Bundle> {
    let created_at: String = row.get("created_at")?;
    Ok(Bundle {
        id: row.get("id")?,
        name: row.get("name")?,
        tenant: Tenant {
            app_id: row.get("app_id")?,
            user_id: row.get("external_user_id")?,
        },
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
    })
}

pub fn create_bundle(conn: &Connection, tenant: &Tenant, name: &str) -> Result<Bundle> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CortexError::Validation(
            "bundle name must not be empty".to_string(),
        ));
    }

    conn.execute(
        "INSERT INTO bundles (name, app_id, external_user_id, created_at) VALUES (?, ?, ?, ?)",
        params![name, tenant.app_id, tenant.user_id, format_timestamp(&Utc::now())],
    )?;

    get_bundle(conn, conn.last_insert_rowid(), tenant)
}

pub fn get_bundle(conn: &Connection, id: BundleId, tenant: &Tenant) -> Result<Bundle> {
    conn.query_row(
        "SELECT id, name, app_id, external_user_id, created_at FROM bundles
         WHERE id = ? AND app_id = ? AND external_user_id = ?",
        params![id, tenant.app_id, tenant.user_id],
        bundle_from_row,
    )
    .optional()?
    .ok_or_else(|| CortexError::bundle_not_found(id))
}

/// Bundles of a tenant, newest first
pub fn list_bundles(conn: &Connection, tenant: &Tenant) -> Result<Vec<Bundle>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, app_id, external_user_id, created_at FROM bundles
         WHERE app_id = ? AND external_user_id = ?
         ORDER BY created_at DESC, id DESC",
    )?;

    let bundles = stmt
        .query_map(params![tenant.app_id, tenant.user_id], bundle_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(bundles)
}

/// Detach the bundle's memories, then delete the bundle
///
/// Callers should run this inside a transaction so the two steps commit
/// together.
pub fn delete_bundle(conn: &Connection, id: BundleId, tenant: &Tenant) -> Result<()> {
    // Existence check first so a foreign bundle id never touches memories
    get_bundle(conn, id, tenant)?;

    let detached = conn.execute(
        "UPDATE memories SET bundle_id = NULL
         WHERE bundle_id = ? AND app_id = ? AND external_user_id = ?",
        params![id, tenant.app_id, tenant.user_id],
    )?;

    conn.execute(
        "DELETE FROM bundles WHERE id = ? AND app_id = ? AND external_user_id = ?",
        params![id, tenant.app_id, tenant.user_id],
    )?;

    tracing::debug!(bundle_id = id, detached, "Deleted bundle");

    Ok(())
}
