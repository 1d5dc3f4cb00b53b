//! Storage engine for Cortex
//!
//! Handles SQLite database operations, WAL mode, and schema management.
//! Every write to the database goes through this module.

pub mod bundles;
mod connection;
pub mod entities;
mod migrations;
pub mod queries;

pub use connection::Storage;
pub use migrations::SCHEMA_VERSION;

use chrono::{DateTime, SecondsFormat, Utc};

/// Timestamps are stored in one fixed-width RFC 3339 form so that SQL string
/// comparison orders them correctly.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
