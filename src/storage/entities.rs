//! Entity and relation queries
//!
//! Entities are named subjects within a tenant carrying a JSON object of
//! facts. Relations are typed edges between entity names; an edge is stored
//! once per tenant no matter how often it is reported.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use super::{format_timestamp, parse_timestamp};
use crate::error::{CortexError, Result};
use crate::types::{Entity, Metadata, Relation, Tenant};

const ENTITY_COLUMNS: &str = "id, app_id, external_user_id, name, data, created_at, updated_at";

const RELATION_COLUMNS: &str =
    "id, app_id, external_user_id, from_entity, to_entity, type, valid_from, valid_to, created_at";

fn entity_from_row(row: &Row) -> rusqlite::Result<Entity> {
    let data: String = row.get("data")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Entity {
        id: row.get("id")?,
        tenant: Tenant {
            app_id: row.get("app_id")?,
            user_id: row.get("external_user_id")?,
        },
        name: row.get("name")?,
        data: Metadata::from_json_str(&data),
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_timestamp(&updated_at).unwrap_or_else(Utc::now),
    })
}

fn relation_from_row(row: &Row) -> rusqlite::Result<Relation> {
    let valid_from: Option<String> = row.get("valid_from")?;
    let valid_to: Option<String> = row.get("valid_to")?;
    let created_at: String = row.get("created_at")?;

    Ok(Relation {
        id: row.get("id")?,
        tenant: Tenant {
            app_id: row.get("app_id")?,
            user_id: row.get("external_user_id")?,
        },
        from: row.get("from_entity")?,
        to: row.get("to_entity")?,
        relation_type: row.get("type")?,
        valid_from: valid_from.as_deref().and_then(parse_timestamp),
        valid_to: valid_to.as_deref().and_then(parse_timestamp),
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
    })
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CortexError::Validation(format!("{} must not be empty", field)));
    }
    Ok(value)
}

/// Create an entity or replace the facts of an existing one with the same name
pub fn upsert_entity(conn: &Connection, tenant: &Tenant, name: &str, data: &Metadata) -> Result<Entity> {
    let name = required(name, "entity name")?;
    let now = format_timestamp(&Utc::now());

    conn.execute(
        "INSERT INTO entities (app_id, external_user_id, name, data, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(app_id, external_user_id, name)
         DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        params![tenant.app_id, tenant.user_id, name, data.to_json_string()?, now],
    )?;

    get_entity(conn, tenant, name)
}

/// Set one fact on an entity, creating the entity if needed
///
/// Other facts are kept. Callers should run this inside a transaction so a
/// concurrent fact on the same entity is not lost.
pub fn set_fact(
    conn: &Connection,
    tenant: &Tenant,
    name: &str,
    key: &str,
    value: Value,
) -> Result<Entity> {
    let name = required(name, "entity name")?;
    let key = required(key, "fact key")?;

    let mut data = match get_entity(conn, tenant, name) {
        Ok(entity) => entity.data,
        Err(CortexError::EntityNotFound(_)) => Metadata::new(),
        Err(e) => return Err(e),
    };
    data.insert(key, value);

    upsert_entity(conn, tenant, name, &data)
}

pub fn get_entity(conn: &Connection, tenant: &Tenant, name: &str) -> Result<Entity> {
    let sql = format!(
        "SELECT {} FROM entities WHERE app_id = ? AND external_user_id = ? AND name = ?",
        ENTITY_COLUMNS
    );
    conn.query_row(&sql, params![tenant.app_id, tenant.user_id, name.trim()], entity_from_row)
        .optional()?
        .ok_or_else(|| CortexError::EntityNotFound(name.trim().to_string()))
}

/// Entities of a tenant, most recently updated first
pub fn list_entities(conn: &Connection, tenant: &Tenant) -> Result<Vec<Entity>> {
    let sql = format!(
        "SELECT {} FROM entities WHERE app_id = ? AND external_user_id = ?
         ORDER BY updated_at DESC, id DESC",
        ENTITY_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;

    let entities = stmt
        .query_map(params![tenant.app_id, tenant.user_id], entity_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entities)
}

/// Record the edge `from -[relation_type]-> to`; an existing edge is returned as is
pub fn upsert_relation(
    conn: &Connection,
    tenant: &Tenant,
    from: &str,
    to: &str,
    relation_type: &str,
) -> Result<Relation> {
    let from = required(from, "from")?;
    let to = required(to, "to")?;
    let relation_type = required(relation_type, "relation type")?;

    let inserted = conn.execute(
        "INSERT INTO relations (app_id, external_user_id, from_entity, to_entity, type, created_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(app_id, external_user_id, from_entity, to_entity, type) DO NOTHING",
        params![
            tenant.app_id,
            tenant.user_id,
            from,
            to,
            relation_type,
            format_timestamp(&Utc::now())
        ],
    )?;
    if inserted == 0 {
        tracing::debug!(from, to, relation_type, "Relation already recorded");
    }

    let sql = format!(
        "SELECT {} FROM relations
         WHERE app_id = ? AND external_user_id = ? AND from_entity = ? AND to_entity = ? AND type = ?",
        RELATION_COLUMNS
    );
    Ok(conn.query_row(
        &sql,
        params![tenant.app_id, tenant.user_id, from, to, relation_type],
        relation_from_row,
    )?)
}

/// Relations of a tenant, newest first, optionally touching one entity on either end
pub fn list_relations(conn: &Connection, tenant: &Tenant, entity: Option<&str>) -> Result<Vec<Relation>> {
    let entity = entity.map(str::trim).filter(|e| !e.is_empty());

    let sql = format!(
        "SELECT {} FROM relations
         WHERE app_id = ?1 AND external_user_id = ?2
           AND (?3 IS NULL OR from_entity = ?3 OR to_entity = ?3)
         ORDER BY created_at DESC, id DESC",
        RELATION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;

    let relations = stmt
        .query_map(params![tenant.app_id, tenant.user_id, entity], relation_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(relations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use serde_json::json;

    #[test]
    fn test_facts_accumulate_on_one_entity() {
        let storage = Storage::open_in_memory().unwrap();
        let tenant = Tenant::new("app", "user");

        storage
            .with_transaction(|conn| {
                let first = set_fact(conn, &tenant, "Alice", "city", json!("Lisbon"))?;
                let second = set_fact(conn, &tenant, " Alice ", "age", json!(34))?;
                assert_eq!(first.id, second.id);
                assert_eq!(second.data.get("city"), Some(&json!("Lisbon")));
                assert_eq!(second.data.get("age"), Some(&json!(34)));

                let updated = set_fact(conn, &tenant, "Alice", "city", json!("Porto"))?;
                assert_eq!(updated.data.get("city"), Some(&json!("Porto")));
                assert_eq!(updated.data.len(), 2);
                assert!(updated.updated_at >= updated.created_at);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_upsert_replaces_data_and_lists_recent_first() {
        let storage = Storage::open_in_memory().unwrap();
        let tenant = Tenant::new("app", "user");

        storage
            .with_connection(|conn| {
                let data: Metadata = [("role".to_string(), json!("manager"))].into_iter().collect();
                upsert_entity(conn, &tenant, "Bob", &data)?;
                upsert_entity(conn, &tenant, "Carol", &Metadata::new())?;
                conn.execute(
                    "UPDATE entities SET updated_at = '2020-01-01T00:00:00.000000Z' WHERE name = 'Carol'",
                    [],
                )?;

                let replaced = upsert_entity(conn, &tenant, "Bob", &Metadata::new())?;
                assert!(replaced.data.is_empty());

                let names: Vec<_> = list_entities(conn, &tenant)?
                    .into_iter()
                    .map(|e| e.name)
                    .collect();
                assert_eq!(names, vec!["Bob", "Carol"]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_entities_are_tenant_scoped() {
        let storage = Storage::open_in_memory().unwrap();
        let owner = Tenant::new("app", "owner");
        let other = Tenant::new("app", "other");

        storage
            .with_connection(|conn| {
                set_fact(conn, &owner, "Dana", "team", json!("infra"))?;
                assert!(get_entity(conn, &other, "Dana").unwrap_err().is_not_found());
                assert!(list_entities(conn, &other)?.is_empty());

                // Same name in another tenant is a separate entity
                let theirs = set_fact(conn, &other, "Dana", "team", json!("sales"))?;
                let ours = get_entity(conn, &owner, "Dana")?;
                assert_ne!(theirs.id, ours.id);
                assert_eq!(ours.data.get("team"), Some(&json!("infra")));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_blank_names_rejected() {
        let storage = Storage::open_in_memory().unwrap();
        let tenant = Tenant::new("app", "user");

        storage
            .with_connection(|conn| {
                let err = set_fact(conn, &tenant, "  ", "k", json!(1)).unwrap_err();
                assert!(matches!(err, CortexError::Validation(_)));
                let err = set_fact(conn, &tenant, "Eve", "", json!(1)).unwrap_err();
                assert!(matches!(err, CortexError::Validation(_)));
                let err = upsert_relation(conn, &tenant, "Eve", "", "knows").unwrap_err();
                assert!(matches!(err, CortexError::Validation(_)));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_relations_deduplicate_and_filter_by_entity() {
        let storage = Storage::open_in_memory().unwrap();
        let tenant = Tenant::new("app", "user");
        let other = Tenant::new("app", "other");

        storage
            .with_connection(|conn| {
                let first = upsert_relation(conn, &tenant, "Alice", "Bob", "manages")?;
                let again = upsert_relation(conn, &tenant, "Alice", "Bob", "manages")?;
                assert_eq!(first.id, again.id);
                assert_eq!(first.relation_type, "manages");
                assert!(first.valid_from.is_none());

                upsert_relation(conn, &tenant, "Bob", "Carol", "mentors")?;
                upsert_relation(conn, &tenant, "Dana", "Eve", "knows")?;
                upsert_relation(conn, &other, "Alice", "Bob", "manages")?;

                assert_eq!(list_relations(conn, &tenant, None)?.len(), 3);
                assert_eq!(list_relations(conn, &tenant, Some(""))?.len(), 3);

                let bob: Vec<_> = list_relations(conn, &tenant, Some("Bob"))?
                    .into_iter()
                    .map(|r| (r.from, r.to))
                    .collect();
                assert_eq!(
                    bob,
                    vec![
                        ("Bob".to_string(), "Carol".to_string()),
                        ("Alice".to_string(), "Bob".to_string()),
                    ]
                );

                assert_eq!(list_relations(conn, &other, None)?.len(), 1);
                Ok(())
            })
            .unwrap();
    }
}
