//! # OpenMemory Core
//!
//! Multi-tenant hierarchical semantic-graph (HSG) memory engine:
//!
//! - **Sector-partitioned writes**: every memory is routed into one or more
//!   of five cognitive sectors (episodic, semantic, procedural, emotional,
//!   reflective), each indexed with its own embedding vector
//! - **Hybrid retrieval**: vector cosine + keyword boost + BM25 + salience +
//!   recency, combined with configurable weights
//! - **Salience lifecycle**: exponential decay, reinforcement on access,
//!   cold-memory fingerprinting, and regeneration
//! - **Structural namespace isolation**: one physical vector collection per
//!   namespace, never filter-based tenancy
//! - **Temporal facts**: (subject, predicate, object) rows with validity
//!   intervals and point-in-time queries
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use openmemory_core::{
//!     Config, EmbedderHandle, HsgEngine, InProcVectorStore, QueryInput,
//!     SqliteStore, StoreInput,
//! };
//!
//! let mut config = Config::default();
//! config.resolve_tier();
//! let config = Arc::new(config);
//!
//! let store = Arc::new(SqliteStore::open(config.resolved_db_path())?);
//! let vectors = Arc::new(InProcVectorStore::new(
//!     config.vec_dim,
//!     config.collection_prefix.clone(),
//! ));
//! let embedder = Arc::new(EmbedderHandle::from_config(&config));
//! let engine = Arc::new(HsgEngine::new(config, store, vectors, embedder));
//!
//! let receipt = engine.store_memory(StoreInput {
//!     content: "Paris is the capital of France".to_string(),
//!     ..Default::default()
//! }).await?;
//!
//! let results = engine.query(QueryInput {
//!     query: "capital of France".to_string(),
//!     ..Default::default()
//! }).await?;
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod embed;
pub mod engine;
pub mod memory;
pub mod reflect;
pub mod salience;
pub mod store;
pub mod summarize;
pub mod temporal;
pub mod vector;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Configuration
pub use config::{
    Config, ConfigError, EmbedMode, EmbeddingProviderKind, MetadataBackend, ScoreWeights, Tier,
    VectorBackend,
};

// Memory types
pub use memory::{
    Classification, Memory, MemoryStats, NamespaceRecord, QueryFilters, QueryInput, QueryMatch,
    QueryResponse, Sector, SectorRouter, StatRow, StoreInput, StoreReceipt, TemporalFact,
    UserSummary, Waypoint, ALL_SECTORS, DEFAULT_NAMESPACE,
};

// Embedding layer
pub use embed::{
    centroid, cosine_similarity, EmbedError, Embedder, EmbedderHandle, GeminiEmbedder,
    OllamaEmbedder, OpenAiEmbedder, SyntheticEmbedder,
};

// Metadata store
pub use store::{
    CorpusStats, MemoryFlags, MetadataStore, PostgresStore, SqliteStore, StorageError, VectorMeta,
};

// Vector store
pub use vector::{
    sanitize_namespace, InProcVectorStore, QdrantVectorStore, VectorHit, VectorPoint, VectorStore,
    VectorStoreError, VectorStoreStats,
};

// Engine
pub use engine::{EngineError, HsgEngine, Supervisor, UpdateInput};

// Salience lifecycle
pub use salience::{decayed, recency, reinforced, DecayWorkerPool, DEFAULT_BOOST};

// Reflection
pub use reflect::ReflectionJob;

// Temporal facts
pub use temporal::{FactInput, TemporalFacts};

// Summaries
pub use summarize::summarize;

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Config, EmbedderHandle, EngineError, HsgEngine, InProcVectorStore, Memory, MemoryStats,
        QueryFilters, QueryInput, QueryMatch, QueryResponse, Sector, SqliteStore, StoreInput,
        StoreReceipt, Supervisor,
    };
}
