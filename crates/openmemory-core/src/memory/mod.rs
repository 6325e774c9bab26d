//! Memory types - the fundamental units of the semantic-graph store
//!
//! Each memory carries:
//! - Content, namespaces, tags, and opaque metadata
//! - Sector membership (one primary, possibly several active)
//! - Salience state for the decay/reinforcement lifecycle
//! - Fingerprint and repair flags for cold-memory handling

mod sector;

pub use sector::{Classification, Sector, SectorRouter, ALL_SECTORS};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Namespace used when a write or query names none.
pub const DEFAULT_NAMESPACE: &str = "global";

/// Hard bounds for the `k` parameter of a query.
pub const MIN_K: usize = 1;
pub const MAX_K: usize = 32;

// ============================================================================
// MEMORY
// ============================================================================

/// A memory row in the hierarchical semantic-graph store
///
/// Timestamps are unix seconds. Invariants upheld by the engine:
/// `sectors` contains `primary_sector`, `salience` stays in [0, 1],
/// `last_seen_at >= created_at`, and `namespaces` is never empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Opaque stable identifier (UUID v4)
    pub id: String,
    /// The textual payload
    pub content: String,
    /// Compressed form used when the memory goes cold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Non-empty ordered list of namespace labels
    pub namespaces: Vec<String>,
    /// Short categorization labels
    pub tags: Vec<String>,
    /// Opaque key/value payload supplied by the caller
    pub metadata: HashMap<String, Value>,
    /// Sector with the highest classification score
    pub primary_sector: Sector,
    /// Sectors for which a vector exists (always includes the primary)
    pub sectors: Vec<Sector>,
    /// Stored salience at `last_seen_at`; reads decay it to "now"
    pub salience: f64,
    /// Per-memory exponential decay coefficient (per day)
    pub decay_lambda: f64,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_seen_at: i64,
    /// Content has been replaced (or flagged) by the cold-memory sweep
    #[serde(default)]
    pub fingerprinted: bool,
    /// Metadata committed but at least one vector upsert is still outstanding
    #[serde(default)]
    pub pending_vector: bool,
    /// Stored with a synthetic fallback vector; regeneration should re-embed
    #[serde(default)]
    pub needs_reembed: bool,
}

impl Memory {
    /// Salience decayed to the given instant. Never leaves [0, 1].
    pub fn salience_at(&self, now: i64) -> f64 {
        crate::salience::decayed(self.salience, self.decay_lambda, self.last_seen_at, now)
    }

    /// Whether any of the memory's namespaces appears in `requested`.
    pub fn visible_to(&self, requested: &[String]) -> bool {
        self.namespaces.iter().any(|n| requested.contains(n))
    }
}

// ============================================================================
// WAYPOINTS, NAMESPACES, FACTS
// ============================================================================

/// Directed weighted edge between two memories in the same namespace.
/// At most one outbound waypoint per `(src_id, namespace)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    pub src_id: String,
    pub dst_id: String,
    pub namespace: String,
    pub weight: f64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A namespace group row. Auto-created on first reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceRecord {
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ontology_profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_json: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub active: bool,
}

/// A temporal fact with a validity interval.
/// `valid_from <= valid_to` whenever both are set; `valid_to = None` means
/// the fact is still current.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalFact {
    pub id: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub namespace: String,
    pub valid_from: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<i64>,
    pub confidence: f64,
}

/// Maintenance counter row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatRow {
    pub stat_type: String,
    pub count: i64,
    pub ts: i64,
}

/// Per-namespace digest rebuilt by the reflection job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub namespace: String,
    pub summary: String,
    pub reflection_count: i64,
    pub updated_at: i64,
}

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Input for storing a new memory
///
/// Uses `deny_unknown_fields` to prevent field injection through the
/// external surfaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StoreInput {
    /// The content to remember
    pub content: String,
    /// Namespace labels; empty means `["global"]`
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Accept the write even if the vector upsert has to be retried later
    #[serde(default)]
    pub lenient: bool,
}

/// What the engine returns after a successful store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreReceipt {
    pub id: String,
    pub primary_sector: Sector,
    pub sectors: Vec<Sector>,
    pub namespaces: Vec<String>,
    /// Set when the caller opted into lenient writes and the vector
    /// upsert is still outstanding
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending_vector: bool,
}

/// Filters accepted by the query path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryFilters {
    /// Namespaces to search; empty means `["global"]`
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Sector subset; `None` searches all five
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sectors: Option<Vec<Sector>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_salience: Option<f64>,
    /// Require at least one of these tags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Input for querying memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryInput {
    pub query: String,
    /// Result count, clamped to [1, 32]
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub filters: QueryFilters,
}

fn default_k() -> usize {
    8
}

impl Default for QueryInput {
    fn default() -> Self {
        Self {
            query: String::new(),
            k: default_k(),
            filters: QueryFilters::default(),
        }
    }
}

// ============================================================================
// QUERY RESULTS
// ============================================================================

/// One ranked hit from the query path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMatch {
    pub id: String,
    pub score: f64,
    pub primary_sector: Sector,
    /// Sector whose vector produced the winning score
    pub primary_hit: Sector,
    /// All sectors that returned a vector hit for this memory
    pub sectors: Vec<Sector>,
    pub salience: f64,
    pub last_seen_at: i64,
    /// Content, or the summary when the memory is fingerprinted
    pub content: String,
    #[serde(default)]
    pub fingerprinted: bool,
    /// Waypoint hops taken to reach this hit (empty for direct hits)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
}

/// The full query response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub matches: Vec<QueryMatch>,
    /// Set when one or more sector searches failed and were skipped
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

/// Aggregate counts reported by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_memories: i64,
    pub namespaces: HashMap<String, i64>,
    pub sectors: HashMap<String, i64>,
    pub embed_fallbacks: i64,
    pub fingerprinted: i64,
}

// ============================================================================
// TESTS
// ============================================================================
