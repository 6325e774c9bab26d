//! Metadata store - durable rows for memories, vectors, waypoints,
//! namespaces, stats, user summaries, and temporal facts
//!
//! Two backends satisfy the same trait: an embedded single-file engine
//! (SQLite) and a client/server engine (Postgres). Both run versioned,
//! idempotent migrations before serving and commit a single memory write
//! (memory row + vector metadata rows) atomically.

mod migrations;
mod postgres;
mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::memory::{
    Memory, NamespaceRecord, Sector, StatRow, TemporalFact, UserSummary, Waypoint,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Embedded database error
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Client/server database error
    #[error("database error: {0}")]
    Postgres(#[from] sqlx::Error),
    /// Row not found
    #[error("not found: {0}")]
    NotFound(String),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Row (de)serialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Initialization error
    #[error("initialization error: {0}")]
    Init(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// ROW TYPES
// ============================================================================

/// Metadata row recording that a vector exists for `(memory_id, sector)`
/// within a namespace collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorMeta {
    pub memory_id: String,
    pub sector: Sector,
    pub namespace: String,
    pub dim: usize,
    pub created_at: i64,
}

/// Partial flag update for a memory row. `None` leaves a flag unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryFlags {
    pub fingerprinted: Option<bool>,
    pub pending_vector: Option<bool>,
    pub needs_reembed: Option<bool>,
}

/// Engine-wide corpus statistics used by BM25 scoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorpusStats {
    pub doc_count: i64,
    pub avg_doc_tokens: f64,
}

/// Count whitespace-separated tokens; persisted per row for corpus averages.
pub(crate) fn token_count(content: &str) -> i64 {
    content.split_whitespace().count() as i64
}

// ============================================================================
// METADATA STORE TRAIT
// ============================================================================

/// Transactional row operations shared by both backends.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    // ---- memories ----

    /// Insert a memory and its vector metadata rows in one transaction.
    async fn insert_memory(&self, memory: &Memory, vectors: &[VectorMeta]) -> Result<()>;
    /// Rewrite a memory row (content, tags, metadata, salience, timestamps).
    async fn update_memory(&self, memory: &Memory) -> Result<()>;
    /// Delete a memory; cascades to vector metadata, namespace links, and
    /// waypoints referencing it. Returns whether a row was removed.
    async fn delete_memory(&self, id: &str) -> Result<bool>;
    async fn get_memory(&self, id: &str) -> Result<Option<Memory>>;
    /// Batch load; missing ids are silently skipped.
    async fn get_memories(&self, ids: &[String]) -> Result<Vec<Memory>>;
    /// Paged listing, optionally scoped to a namespace and/or primary sector,
    /// newest first.
    async fn list_memories(
        &self,
        namespace: Option<&str>,
        sector: Option<Sector>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Memory>>;
    async fn count_memories(&self) -> Result<i64>;
    async fn count_by_namespace(&self) -> Result<HashMap<String, i64>>;
    async fn count_by_sector(&self) -> Result<HashMap<String, i64>>;
    async fn count_fingerprinted(&self) -> Result<i64>;
    async fn set_flags(&self, id: &str, flags: MemoryFlags) -> Result<()>;
    /// Monotonic salience/last-seen update from a reinforcement.
    async fn apply_reinforcement(&self, id: &str, salience: f64, last_seen_at: i64) -> Result<()>;
    /// Replace the fingerprinted memory's content with its summary.
    async fn apply_fingerprint(&self, id: &str, summary: &str, updated_at: i64) -> Result<()>;

    // ---- vector metadata ----

    async fn replace_vector_meta(&self, memory_id: &str, vectors: &[VectorMeta]) -> Result<()>;
    async fn vector_meta_for(&self, memory_id: &str) -> Result<Vec<VectorMeta>>;

    // ---- waypoints ----

    async fn upsert_waypoint(&self, waypoint: &Waypoint) -> Result<()>;
    async fn get_waypoint(&self, src_id: &str, namespace: &str) -> Result<Option<Waypoint>>;
    async fn delete_waypoint(&self, src_id: &str, namespace: &str) -> Result<bool>;

    // ---- namespaces ----

    /// Create the namespace row if absent. Returns true when a row was
    /// created; safe under concurrency (insert-or-ignore semantics).
    async fn ensure_namespace(&self, namespace: &str) -> Result<bool>;
    async fn upsert_namespace(&self, record: &NamespaceRecord) -> Result<()>;
    async fn get_namespace(&self, namespace: &str) -> Result<Option<NamespaceRecord>>;
    async fn list_namespaces(&self) -> Result<Vec<NamespaceRecord>>;
    async fn list_namespace_labels(&self) -> Result<Vec<String>>;
    /// Soft delete: marks the namespace inactive.
    async fn delete_namespace(&self, namespace: &str) -> Result<bool>;

    // ---- stats ----

    async fn append_stat(&self, stat_type: &str, count: i64) -> Result<()>;
    async fn read_stats(&self, stat_type: Option<&str>, limit: i64) -> Result<Vec<StatRow>>;
    async fn stat_total(&self, stat_type: &str) -> Result<i64>;

    // ---- user summaries ----

    async fn upsert_user_summary(&self, summary: &UserSummary) -> Result<()>;
    async fn get_user_summary(&self, namespace: &str) -> Result<Option<UserSummary>>;

    // ---- temporal facts ----

    async fn insert_fact(&self, fact: &TemporalFact) -> Result<()>;
    /// The currently-valid (unbounded `valid_to`) row for a triple, if any.
    async fn current_fact(
        &self,
        subject: &str,
        predicate: &str,
        namespace: &str,
    ) -> Result<Option<TemporalFact>>;
    async fn close_fact(&self, id: &str, valid_to: i64) -> Result<()>;
    /// Rows where `valid_from <= at < coalesce(valid_to, +inf)`, ordered by
    /// confidence then valid_from.
    async fn facts_at(
        &self,
        subject: Option<&str>,
        predicate: Option<&str>,
        at: i64,
        namespace: &str,
    ) -> Result<Vec<TemporalFact>>;
    async fn fact_timeline(
        &self,
        subject: &str,
        namespace: &str,
        limit: i64,
    ) -> Result<Vec<TemporalFact>>;
    async fn delete_fact(&self, id: &str) -> Result<bool>;

    // ---- retrieval support ----

    /// Memory ids whose content matches the query keywords, scoped to the
    /// given namespaces. Used for candidate generation in keyword-only mode.
    async fn keyword_candidates(
        &self,
        namespaces: &[String],
        query: &str,
        limit: i64,
    ) -> Result<Vec<String>>;
    async fn corpus_stats(&self) -> Result<CorpusStats>;
    /// Memories flagged `needs_reembed`, oldest first.
    async fn memories_needing_reembed(&self, limit: i64) -> Result<Vec<Memory>>;
}

// ============================================================================
// SHARED (DE)SERIALIZATION HELPERS
// ============================================================================

pub(crate) fn sectors_to_json(sectors: &[Sector]) -> String {
    serde_json::to_string(&sectors.iter().map(|s| s.as_str()).collect::<Vec<_>>())
        .unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn sectors_from_json(raw: &str) -> Vec<Sector> {
    serde_json::from_str::<Vec<String>>(raw)
        .unwrap_or_default()
        .iter()
        .filter_map(|s| Sector::parse_name(s))
        .collect()
}

pub(crate) fn strings_to_json(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn strings_from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(crate) fn metadata_to_json(metadata: &HashMap<String, serde_json::Value>) -> String {
    serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string())
}

pub(crate) fn metadata_from_json(raw: &str) -> HashMap<String, serde_json::Value> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Tokenize a query into alphanumeric terms, lowercased, for keyword search.
pub(crate) fn query_terms(query: &str, min_len: usize) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= min_len)
        .map(str::to_string)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
