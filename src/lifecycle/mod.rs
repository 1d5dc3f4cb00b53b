//! Lifecycle maintenance
//!
//! A maintenance run walks these categories in order, each gated by
//! [`MaintenanceConfig`]:
//! 1. archive memories whose TTL has passed
//! 2. hard-delete archived memories older than a configured age
//! 3. merge near-duplicate memories per tenant
//! 4. archive memories below an importance threshold
//!
//! Runs are synchronous. A [`CancelToken`] is checked between categories and
//! between merge pairs; work already committed stays committed.

mod worker;

pub use worker::{MaintenanceCommand, MaintenanceWorker};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::embedding::{detect_content_type, encode_vector, Embedder};
use crate::error::{CortexError, Result};
use crate::storage::{queries, Storage};
use crate::types::{BundleId, Memory};

/// Threshold used when low-importance archival is enabled without one
pub const DEFAULT_LOW_IMPORTANCE_THRESHOLD: i32 = 2;

/// Pair cap applied when `merge_max_pairs` is 0
pub const FALLBACK_MERGE_PAIR_CAP: usize = 100;

/// Interval between scheduled runs when none is configured
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Count what would change without writing
    pub dry_run: bool,
    /// Archive active memories with `expires_at <= now`
    pub archive_expired: bool,
    /// Archive active memories with importance below this (1 - 10)
    pub low_importance: Option<i32>,
    /// Hard-delete archived memories not modified for this long
    pub delete_archived_after: Option<Duration>,
    /// Merge near-duplicate memories
    pub merge_similar: bool,
    /// Minimum cosine similarity for a merge pair
    pub merge_min_similarity: f32,
    /// Pairs collected per tenant per run (0 = fallback cap of 100)
    pub merge_max_pairs: usize,
    /// Only merge inside this bundle
    pub merge_bundle_id: Option<BundleId>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            archive_expired: true,
            low_importance: None,
            delete_archived_after: None,
            merge_similar: false,
            merge_min_similarity: 0.95,
            merge_max_pairs: 50,
            merge_bundle_id: None,
        }
    }
}

impl MaintenanceConfig {
    /// Load overrides from `CORTEX_CLEANUP_*` environment variables
    ///
    /// Invalid values are ignored and the default is kept.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let flag = |key: &str| lookup(key).map(|v| v.trim().to_lowercase());

        if matches!(flag("CORTEX_CLEANUP_DRY_RUN").as_deref(), Some("true" | "1")) {
            config.dry_run = true;
        }
        if matches!(
            flag("CORTEX_CLEANUP_ARCHIVE_EXPIRY").as_deref(),
            Some("false" | "0")
        ) {
            config.archive_expired = false;
        }
        if let Some(age) = lookup("CORTEX_CLEANUP_DELETE_ARCHIVED_AFTER")
            .as_deref()
            .and_then(parse_duration)
        {
            if !age.is_zero() {
                config.delete_archived_after = Some(age);
            }
        }
        if matches!(
            flag("CORTEX_CLEANUP_MERGE_SIMILAR").as_deref(),
            Some("true" | "1")
        ) {
            config.merge_similar = true;
        }
        if let Some(similarity) = lookup("CORTEX_CLEANUP_MERGE_SIMILARITY")
            .and_then(|v| v.trim().parse::<f32>().ok())
            .filter(|s| (0.0..=1.0).contains(s))
        {
            config.merge_min_similarity = similarity;
        }
        if let Some(pairs) = lookup("CORTEX_CLEANUP_MERGE_MAX_PAIRS")
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            config.merge_max_pairs = pairs;
        }

        let threshold = lookup("CORTEX_CLEANUP_LOW_IMPORTANCE_THRESHOLD")
            .and_then(|v| v.trim().parse::<i32>().ok())
            .filter(|t| (1..=10).contains(t))
            .unwrap_or(DEFAULT_LOW_IMPORTANCE_THRESHOLD);
        if matches!(
            flag("CORTEX_CLEANUP_ARCHIVE_LOW_IMPORTANCE").as_deref(),
            Some("true" | "1")
        ) {
            config.low_importance = Some(threshold);
        }

        config
    }

    fn pair_cap(&self) -> usize {
        if self.merge_max_pairs == 0 {
            FALLBACK_MERGE_PAIR_CAP
        } else {
            self.merge_max_pairs
        }
    }
}

/// Parse a duration such as `3600`, `90s`, `45m`, `720h` or `30d`.
/// A bare number is seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (digits, multiplier) = match raw.char_indices().last()? {
        (i, 's') => (&raw[..i], 1),
        (i, 'm') => (&raw[..i], 60),
        (i, 'h') => (&raw[..i], 60 * 60),
        (i, 'd') => (&raw[..i], 24 * 60 * 60),
        _ => (raw, 1),
    };

    let value: u64 = digits.trim().parse().ok()?;
    value.checked_mul(multiplier).map(Duration::from_secs)
}

/// Counts from one maintenance run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceStats {
    pub archived_expired: i64,
    pub archived_low_importance: i64,
    pub deleted_archived: i64,
    /// Pairs merged (or qualifying pairs, in dry-run)
    pub merged_pairs: i64,
    /// The run stopped early because its token was cancelled
    pub cancelled: bool,
}

/// Cooperative cancellation flag shared with a running maintenance pass
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs maintenance passes against a store
pub struct LifecycleEngine {
    storage: Storage,
    embedder: Arc<dyn Embedder>,
}

impl LifecycleEngine {
    pub fn new(storage: Storage, embedder: Arc<dyn Embedder>) -> Self {
        Self { storage, embedder }
    }

    /// Run one maintenance pass
    ///
    /// Database errors abort the run. A failed merge of a single pair is
    /// logged and skipped.
    pub fn run_maintenance(
        &self,
        config: &MaintenanceConfig,
        cancel: &CancelToken,
    ) -> Result<MaintenanceStats> {
        let mut stats = MaintenanceStats::default();
        let now = Utc::now();
        let dry_run = config.dry_run;

        if cancel.is_cancelled() {
            stats.cancelled = true;
            return Ok(stats);
        }

        if config.archive_expired {
            stats.archived_expired = self
                .storage
                .with_connection(|conn| queries::archive_expired(conn, now, dry_run))?;
            if stats.archived_expired > 0 {
                tracing::info!(count = stats.archived_expired, dry_run, "Archived expired memories");
            }
        }

        if cancel.is_cancelled() {
            stats.cancelled = true;
            return Ok(stats);
        }

        if let Some(age) = config.delete_archived_after {
            let age = chrono::Duration::from_std(age).map_err(|e| {
                CortexError::Config(format!("delete_archived_after out of range: {}", e))
            })?;
            let cutoff = now - age;
            stats.deleted_archived = self
                .storage
                .with_connection(|conn| queries::delete_archived_before(conn, cutoff, dry_run))?;
            if stats.deleted_archived > 0 {
                tracing::info!(
                    count = stats.deleted_archived,
                    cutoff = %cutoff,
                    dry_run,
                    "Deleted old archived memories"
                );
            }
        }

        if cancel.is_cancelled() {
            stats.cancelled = true;
            return Ok(stats);
        }

        if config.merge_similar {
            self.merge_similar(config, cancel, &mut stats)?;
            if stats.cancelled {
                return Ok(stats);
            }
        }

        if cancel.is_cancelled() {
            stats.cancelled = true;
            return Ok(stats);
        }

        if let Some(threshold) = config.low_importance {
            stats.archived_low_importance = self.storage.with_connection(|conn| {
                queries::archive_low_importance(conn, threshold, dry_run)
            })?;
            if stats.archived_low_importance > 0 {
                tracing::info!(
                    count = stats.archived_low_importance,
                    threshold,
                    dry_run,
                    "Archived low-importance memories"
                );
            }
        }

        tracing::info!(
            archived_expired = stats.archived_expired,
            archived_low_importance = stats.archived_low_importance,
            deleted_archived = stats.deleted_archived,
            merged_pairs = stats.merged_pairs,
            dry_run,
            "Maintenance run finished"
        );

        Ok(stats)
    }

    fn merge_similar(
        &self,
        config: &MaintenanceConfig,
        cancel: &CancelToken,
        stats: &mut MaintenanceStats,
    ) -> Result<()> {
        let tenants = self.storage.with_connection(queries::active_tenants)?;
        let cap = config.pair_cap();

        for tenant in tenants {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                return Ok(());
            }

            let pairs = self.storage.with_connection(|conn| {
                queries::find_similar_pairs(
                    conn,
                    &tenant,
                    config.merge_bundle_id,
                    config.merge_min_similarity,
                    cap,
                )
            })?;

            if config.dry_run {
                stats.merged_pairs += pairs.len() as i64;
                continue;
            }

            for pair in pairs {
                if cancel.is_cancelled() {
                    stats.cancelled = true;
                    return Ok(());
                }

                let merged = self.storage.with_transaction(|conn| {
                    queries::merge_memories(conn, pair.keep_id, pair.merge_id, &tenant)
                });

                match merged {
                    Ok(keep) => {
                        stats.merged_pairs += 1;
                        self.regenerate_embedding(&keep);
                    }
                    Err(e @ CortexError::Database(_)) => return Err(e),
                    Err(e) => {
                        tracing::warn!(
                            tenant = %tenant,
                            keep = pair.keep_id,
                            merge = pair.merge_id,
                            "Merge failed: {}",
                            e
                        );
                    }
                }
            }
        }

        if stats.merged_pairs > 0 {
            tracing::info!(pairs = stats.merged_pairs, "Merged similar memories");
        }

        Ok(())
    }

    /// Re-embed a merged memory; failures are logged, never propagated
    fn regenerate_embedding(&self, memory: &Memory) {
        match embed_and_store(&self.storage, self.embedder.as_ref(), memory) {
            Ok(true) => {}
            Ok(false) => tracing::debug!(memory_id = memory.id, "Merged memory edited, skipping re-embed"),
            Err(e) => tracing::warn!(memory_id = memory.id, "Embedding regeneration failed: {}", e),
        }
    }
}

/// Embed a memory's content and store the vector
///
/// Returns `false` without writing when the row's content changed after
/// `memory` was read.
pub(crate) fn embed_and_store(storage: &Storage, embedder: &dyn Embedder, memory: &Memory) -> Result<bool> {
    let content_type = detect_content_type(&memory.content, &memory.metadata);
    let vector = embedder.embed(&memory.content, &content_type)?;
    let encoded = encode_vector(&vector)?;
    storage.with_connection(|conn| {
        queries::set_embedding_if_current(
            conn,
            memory.id,
            &memory.tenant,
            &memory.content,
            &encoded,
            &content_type,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = MaintenanceConfig::default();
        assert!(config.archive_expired);
        assert!(!config.dry_run);
        assert!(!config.merge_similar);
        assert_eq!(config.merge_min_similarity, 0.95);
        assert_eq!(config.merge_max_pairs, 50);
        assert_eq!(config.low_importance, None);
        assert_eq!(config.delete_archived_after, None);
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("CORTEX_CLEANUP_DRY_RUN", "1"),
            ("CORTEX_CLEANUP_ARCHIVE_EXPIRY", "false"),
            ("CORTEX_CLEANUP_DELETE_ARCHIVED_AFTER", "720h"),
            ("CORTEX_CLEANUP_MERGE_SIMILAR", "true"),
            ("CORTEX_CLEANUP_MERGE_SIMILARITY", "0.9"),
            ("CORTEX_CLEANUP_MERGE_MAX_PAIRS", "0"),
            ("CORTEX_CLEANUP_ARCHIVE_LOW_IMPORTANCE", "true"),
            ("CORTEX_CLEANUP_LOW_IMPORTANCE_THRESHOLD", "3"),
        ]
        .into_iter()
        .collect();

        let config = MaintenanceConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert!(config.dry_run);
        assert!(!config.archive_expired);
        assert_eq!(config.delete_archived_after, Some(Duration::from_secs(720 * 3600)));
        assert!(config.merge_similar);
        assert_eq!(config.merge_min_similarity, 0.9);
        assert_eq!(config.pair_cap(), FALLBACK_MERGE_PAIR_CAP);
        assert_eq!(config.low_importance, Some(3));
    }

    #[test]
    fn test_invalid_env_values_ignored() {
        let vars: HashMap<&str, &str> = [
            ("CORTEX_CLEANUP_MERGE_SIMILARITY", "1.7"),
            ("CORTEX_CLEANUP_MERGE_MAX_PAIRS", "-3"),
            ("CORTEX_CLEANUP_DELETE_ARCHIVED_AFTER", "soon"),
            ("CORTEX_CLEANUP_ARCHIVE_LOW_IMPORTANCE", "1"),
            ("CORTEX_CLEANUP_LOW_IMPORTANCE_THRESHOLD", "42"),
        ]
        .into_iter()
        .collect();

        let config = MaintenanceConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.merge_min_similarity, 0.95);
        assert_eq!(config.merge_max_pairs, 50);
        assert_eq!(config.delete_archived_after, None);
        assert_eq!(config.low_importance, Some(DEFAULT_LOW_IMPORTANCE_THRESHOLD));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("3600"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("45m"), Some(Duration::from_secs(45 * 60)));
        assert_eq!(parse_duration("24h"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("30d"), Some(Duration::from_secs(30 * 86_400)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("h"), None);
        assert_eq!(parse_duration("1.5h"), None);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let shared = token.clone();
        assert!(!shared.is_cancelled());
        token.cancel();
        assert!(shared.is_cancelled());
    }
}
