//! Vector store - namespace-partitioned dense-vector index
//!
//! Each namespace maps to its own physical collection; isolation is
//! structural, not filter-based. Collections are created lazily on first
//! write and cached in a concurrent created-set. Search in a collection
//! that does not exist yet returns an empty result, never an error.

mod inproc;
mod qdrant;

pub use inproc::InProcVectorStore;
pub use qdrant::QdrantVectorStore;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::memory::Sector;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector store error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum VectorStoreError {
    /// Network or transport failure reaching the backing store
    #[error("vector store transport error: {0}")]
    Transport(String),
    /// The backing store rejected the request
    #[error("vector store backend error: {0}")]
    Backend(String),
    /// Index-level failure (in-process backend)
    #[error("vector index error: {0}")]
    Index(String),
    /// Vector has the wrong dimension
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, VectorStoreError>;

// ============================================================================
// TYPES
// ============================================================================

/// A vector to upsert for one (memory, sector) pair.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub memory_id: String,
    pub sector: Sector,
    pub vector: Vec<f32>,
}

/// One hit from a sector search.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub memory_id: String,
    pub sector: Sector,
    pub score: f32,
}

/// Per-collection counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorStoreStats {
    /// collection name -> point count
    pub collections: HashMap<String, usize>,
    pub total_points: usize,
}

// ============================================================================
// NAMESPACE SANITIZATION
// ============================================================================

/// Sanitize a namespace for use as a collection name: `[A-Za-z0-9_-]` pass
/// through, every other byte becomes `_`.
pub fn sanitize_namespace(namespace: &str) -> String {
    namespace
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ============================================================================
// VECTOR STORE TRAIT
// ============================================================================

/// Namespace-partitioned vector index with per-sector filters.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Make sure the namespace's collection exists. Idempotent.
    async fn ensure_collection(&self, namespace: &str) -> Result<()>;

    /// Upsert one vector; idempotent on retry (memory id + sector key the
    /// point).
    async fn upsert(&self, namespace: &str, point: VectorPoint) -> Result<()>;

    /// Upsert many vectors, grouping by namespace internally.
    async fn batch_upsert(&self, points: Vec<(String, VectorPoint)>) -> Result<()>;

    /// Cosine top-n within one namespace and sector. A missing collection
    /// returns an empty result.
    async fn search(
        &self,
        namespace: &str,
        sector: Sector,
        query: &[f32],
        top_n: usize,
    ) -> Result<Vec<VectorHit>>;

    /// Delete a memory's vectors; `sector = None` removes all sectors.
    async fn delete(&self, namespace: &str, memory_id: &str, sector: Option<Sector>) -> Result<()>;

    async fn batch_delete(
        &self,
        namespace: &str,
        memory_ids: &[String],
        sector: Option<Sector>,
    ) -> Result<()>;

    /// Point counts per collection, optionally scoped to one namespace.
    async fn stats(&self, namespace: Option<&str>) -> Result<VectorStoreStats>;
}

// ============================================================================
// TESTS
// ============================================================================
