//! HSG engine - orchestrates the write and query paths
//!
//! The engine owns namespace scoping, the two-step write protocol
//! (metadata commit first, vector upserts second, compensation on failure),
//! hybrid scoring, waypoint expansion, and fire-and-forget reinforcement.

pub mod scoring;
pub mod supervisor;
mod sync;

pub use supervisor::Supervisor;
pub use sync::{IdLocks, NamespaceRegistry};

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::embed::{EmbedError, EmbedderHandle};
use crate::memory::{
    Memory, MemoryStats, QueryFilters, QueryInput, QueryMatch, QueryResponse, Sector, StoreInput,
    StoreReceipt, ALL_SECTORS, DEFAULT_NAMESPACE, MAX_K, MIN_K,
};
use crate::salience;
use crate::store::{MemoryFlags, MetadataStore, StorageError, VectorMeta};
use crate::vector::{VectorPoint, VectorStore, VectorStoreError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Engine error taxonomy. Only the outermost request boundary translates
/// these into HTTP / JSON-RPC codes.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed input; surfaced verbatim to the caller
    #[error("validation error: {0}")]
    Validation(String),
    /// Memory or namespace missing
    #[error("not found: {0}")]
    NotFound(String),
    /// The memory exists but is not in any of the request's namespaces.
    /// Boundaries surface this as NotFound to avoid an existence leak.
    #[error("not found: {0}")]
    NamespaceAccess(String),
    /// Embedding provider failed after retries
    #[error(transparent)]
    Embed(#[from] EmbedError),
    /// Vector store operation failed
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    /// Metadata store failure; fatal for the current request
    #[error(transparent)]
    Metadata(#[from] StorageError),
    /// Request deadline exceeded
    #[error("request timed out")]
    Timeout,
    /// Request canceled by the caller
    #[error("request canceled")]
    Canceled,
    /// Catch-all; logged with context, never exposes internals
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Partial update for an existing memory.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateInput {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// The hierarchical semantic-graph memory engine.
pub struct HsgEngine {
    config: Arc<Config>,
    store: Arc<dyn MetadataStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<EmbedderHandle>,
    router: crate::memory::SectorRouter,
    namespaces: NamespaceRegistry,
    id_locks: IdLocks,
    query_gate: Semaphore,
    query_cache: tokio::sync::Mutex<LruCache<String, Vec<f32>>>,
}

impl HsgEngine {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn MetadataStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<EmbedderHandle>,
    ) -> Self {
        let advanced = config.embed_mode == crate::config::EmbedMode::Advanced;
        let cache_capacity = NonZeroUsize::new((config.cache_segments * 64).max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            router: crate::memory::SectorRouter::new(advanced),
            namespaces: NamespaceRegistry::new(config.lock_shards),
            id_locks: IdLocks::new(config.lock_shards),
            query_gate: Semaphore::new(config.max_active.max(1)),
            query_cache: tokio::sync::Mutex::new(LruCache::new(cache_capacity)),
            config,
            store,
            vectors,
            embedder,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn vectors(&self) -> &Arc<dyn VectorStore> {
        &self.vectors
    }

    pub fn embedder(&self) -> &Arc<EmbedderHandle> {
        &self.embedder
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Store a new memory: route to sectors, embed, commit metadata, then
    /// upsert vectors (two-step protocol).
    pub async fn store_memory(self: &Arc<Self>, input: StoreInput) -> Result<StoreReceipt> {
        if input.content.trim().is_empty() {
            return Err(EngineError::Validation("content cannot be empty".to_string()));
        }

        let namespaces = normalized_namespaces(&input.namespaces);
        self.ensure_namespaces(&namespaces).await?;

        let classification = self
            .router
            .classify(&input.content, &input.tags, &input.metadata);
        let embedded = self
            .embedder
            .embed_sectors(&input.content, &classification.active)
            .await?;
        let any_fallback = embedded.iter().any(|(_, o)| o.fallback);

        let now = chrono::Utc::now().timestamp();
        let id = Uuid::new_v4().to_string();
        let memory = Memory {
            id: id.clone(),
            content: input.content.clone(),
            summary: None,
            namespaces: namespaces.clone(),
            tags: input.tags.clone(),
            metadata: input.metadata.clone(),
            primary_sector: classification.primary,
            sectors: classification.active.clone(),
            salience: classification.primary.default_salience(),
            decay_lambda: classification.primary.default_decay_lambda(),
            created_at: now,
            updated_at: now,
            last_seen_at: now,
            fingerprinted: false,
            pending_vector: false,
            needs_reembed: any_fallback,
        };

        let mut vector_meta = Vec::new();
        let mut points = Vec::new();
        for namespace in &namespaces {
            for (sector, outcome) in &embedded {
                vector_meta.push(VectorMeta {
                    memory_id: id.clone(),
                    sector: *sector,
                    namespace: namespace.clone(),
                    dim: outcome.vector.len(),
                    created_at: now,
                });
                points.push((
                    namespace.clone(),
                    VectorPoint {
                        memory_id: id.clone(),
                        sector: *sector,
                        vector: outcome.vector.clone(),
                    },
                ));
            }
        }

        // Step 1: metadata commit
        self.store.insert_memory(&memory, &vector_meta).await?;

        // Step 2: vector upserts; compensate or flag on failure
        let mut pending_vector = false;
        if let Err(e) = self.vectors.batch_upsert(points).await {
            if input.lenient {
                warn!(id = %id, "vector upsert failed, leaving write pending: {}", e);
                self.store
                    .set_flags(
                        &id,
                        MemoryFlags {
                            pending_vector: Some(true),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.store.append_stat("pending_vector", 1).await?;
                pending_vector = true;
            } else {
                warn!(id = %id, "vector upsert failed, rolling back metadata: {}", e);
                let _ = self.store.delete_memory(&id).await;
                return Err(e.into());
            }
        }

        if any_fallback {
            self.store.append_stat("embed_fallback", 1).await?;
        }

        Ok(StoreReceipt {
            id,
            primary_sector: classification.primary,
            sectors: classification.active,
            namespaces,
            pending_vector,
        })
    }

    /// Idempotent, concurrent-safe namespace initialization: row plus
    /// vector collection, exactly once per label.
    async fn ensure_namespaces(&self, namespaces: &[String]) -> Result<()> {
        for namespace in namespaces {
            if self.namespaces.is_initialized(namespace) {
                continue;
            }
            let _guard = self.namespaces.init_guard(namespace).await;
            if self.namespaces.is_initialized(namespace) {
                continue;
            }
            self.store.ensure_namespace(namespace).await?;
            self.vectors.ensure_collection(namespace).await?;
            self.namespaces.mark_initialized(namespace);
        }
        Ok(())
    }

    // ========================================================================
    // QUERY PATH
    // ========================================================================

    /// Hybrid retrieval: multi-sector vector search, metadata filtering,
    /// weighted scoring, waypoint expansion, and top-k selection.
    pub async fn query(self: &Arc<Self>, input: QueryInput) -> Result<QueryResponse> {
        let _permit = self
            .query_gate
            .acquire()
            .await
            .map_err(|_| EngineError::Internal("query gate closed".to_string()))?;

        if input.query.trim().is_empty() {
            return Err(EngineError::Validation("query cannot be empty".to_string()));
        }
        let k = input.k.clamp(MIN_K, MAX_K);
        let namespaces = normalized_namespaces(&input.filters.namespaces);
        let sectors: Vec<Sector> = match &input.filters.sectors {
            Some(list) if !list.is_empty() => list.clone(),
            _ => ALL_SECTORS.to_vec(),
        };

        let keyword_only = self.config.weights.w_vec == 0.0;
        let now = chrono::Utc::now().timestamp();

        // Candidate collection: per-memory best hit per sector
        let mut candidates: HashMap<String, HashMap<Sector, f32>> = HashMap::new();
        let mut partial = false;

        if keyword_only {
            let limit = (k * self.config.cache_segments).max(100) as i64;
            for id in self
                .store
                .keyword_candidates(&namespaces, &input.query, limit)
                .await?
            {
                candidates.entry(id).or_default();
            }
        } else {
            let query_vector = self.embed_query_cached(&input.query).await?;
            let top_n = std::cmp::max(k * self.config.cache_segments, 1000 / sectors.len().max(1));
            for namespace in &namespaces {
                for sector in &sectors {
                    match self
                        .vectors
                        .search(namespace, *sector, &query_vector, top_n)
                        .await
                    {
                        Ok(hits) => {
                            for hit in hits {
                                let per_sector = candidates.entry(hit.memory_id).or_default();
                                let entry = per_sector.entry(*sector).or_insert(hit.score);
                                if hit.score > *entry {
                                    *entry = hit.score;
                                }
                            }
                        }
                        Err(e) => {
                            // Degrade to a partial result rather than failing
                            warn!(namespace = %namespace, sector = %sector, "sector search failed: {}", e);
                            partial = true;
                        }
                    }
                }
            }
        }

        if candidates.is_empty() {
            return Ok(QueryResponse {
                matches: vec![],
                partial,
            });
        }

        // Batch metadata load + request-level filters
        let ids: Vec<String> = candidates.keys().cloned().collect();
        let memories = self.store.get_memories(&ids).await?;
        let memories: Vec<Memory> = memories
            .into_iter()
            .filter(|m| m.visible_to(&namespaces))
            .filter(|m| passes_filters(m, &input.filters, now))
            .collect();

        // Scoring
        let corpus = self.store.corpus_stats().await?;
        let query_tokens = scoring::tokenize(&input.query);
        let candidate_token_sets: Vec<HashSet<String>> = memories
            .iter()
            .map(|m| scoring::tokenize(&m.content).into_iter().collect())
            .collect();
        let df = scoring::document_frequencies(&query_tokens, &candidate_token_sets);

        let mut scored: Vec<ScoredCandidate> = Vec::with_capacity(memories.len());
        for (memory, token_set) in memories.into_iter().zip(candidate_token_sets.iter()) {
            let sector_hits = candidates.remove(&memory.id).unwrap_or_default();
            let (primary_hit, cosine) = sector_hits
                .iter()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(s, c)| (*s, f64::from(*c)))
                .unwrap_or((memory.primary_sector, 0.0));
            let mut hit_sectors: Vec<Sector> = sector_hits.keys().copied().collect();
            hit_sectors.sort_by_key(|s| s.as_str());
            if hit_sectors.is_empty() {
                hit_sectors.push(memory.primary_sector);
            }

            let content_tokens = scoring::tokenize(&memory.content);
            let parts = scoring::ScoreParts {
                cosine,
                keyword: scoring::keyword_boost(
                    &query_tokens,
                    token_set,
                    self.config.keyword_min_length,
                    self.config.keyword_boost,
                ),
                bm25: scoring::bm25(&query_tokens, &content_tokens, &df, corpus),
                salience: memory.salience_at(now),
                recency: salience::recency(memory.created_at, now, self.config.recency_lambda),
            };
            let score = scoring::hybrid_score(parts, &self.config.weights);
            scored.push(ScoredCandidate {
                memory,
                score,
                primary_hit,
                hit_sectors,
                path: vec![],
            });
        }

        // One-hop waypoint expansion for strong hits
        self.expand_waypoints(&mut scored, &namespaces, &input.filters, now)
            .await;

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.memory
                        .salience_at(now)
                        .partial_cmp(&a.memory.salience_at(now))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.memory.last_seen_at.cmp(&a.memory.last_seen_at))
        });
        scored.truncate(k);
        scored.retain(|c| c.score >= self.config.min_score);

        // Reinforce returned hits without delaying the reply
        if self.config.reinforce_on_query {
            let ids: Vec<String> = scored.iter().map(|c| c.memory.id.clone()).collect();
            self.spawn_reinforcement(ids, self.config.salience_boost);
        }

        let matches = scored
            .into_iter()
            .map(|c| QueryMatch {
                id: c.memory.id.clone(),
                score: c.score,
                primary_sector: c.memory.primary_sector,
                primary_hit: c.primary_hit,
                sectors: c.hit_sectors,
                salience: c.memory.salience_at(now),
                last_seen_at: c.memory.last_seen_at,
                content: match (c.memory.fingerprinted, &c.memory.summary) {
                    (true, Some(summary)) => summary.clone(),
                    _ => c.memory.content.clone(),
                },
                fingerprinted: c.memory.fingerprinted,
                path: c.path,
            })
            .collect();

        Ok(QueryResponse { matches, partial })
    }

    /// Follow each strong hit's outbound waypoint one hop and inject the
    /// target into the pool with a damped score.
    async fn expand_waypoints(
        self: &Arc<Self>,
        scored: &mut Vec<ScoredCandidate>,
        namespaces: &[String],
        filters: &QueryFilters,
        now: i64,
    ) {
        let mut seen: HashSet<String> = scored.iter().map(|c| c.memory.id.clone()).collect();
        let strong: Vec<(String, f64, Vec<String>)> = scored
            .iter()
            .filter(|c| c.score >= self.config.expand_threshold)
            .map(|c| {
                (
                    c.memory.id.clone(),
                    c.score,
                    c.memory
                        .namespaces
                        .iter()
                        .filter(|ns| namespaces.contains(ns))
                        .cloned()
                        .collect(),
                )
            })
            .collect();

        for (src_id, src_score, shared_namespaces) in strong {
            for namespace in &shared_namespaces {
                let waypoint = match self.store.get_waypoint(&src_id, namespace).await {
                    Ok(Some(wp)) => wp,
                    Ok(None) => continue,
                    Err(e) => {
                        debug!(src = %src_id, "waypoint lookup failed: {}", e);
                        continue;
                    }
                };
                if seen.contains(&waypoint.dst_id) {
                    continue;
                }
                let target = match self.store.get_memory(&waypoint.dst_id).await {
                    Ok(Some(m)) => m,
                    _ => continue,
                };
                if !target.visible_to(namespaces) || !passes_filters(&target, filters, now) {
                    continue;
                }
                seen.insert(target.id.clone());
                let score = src_score * self.config.edge_weight * waypoint.weight.clamp(0.0, 1.0);
                scored.push(ScoredCandidate {
                    primary_hit: target.primary_sector,
                    hit_sectors: vec![target.primary_sector],
                    path: vec![src_id.clone()],
                    memory: target,
                    score,
                });
            }
        }
    }

    /// Query-embedding LRU cache keyed by the query text.
    async fn embed_query_cached(&self, query: &str) -> Result<Vec<f32>> {
        {
            let mut cache = self.query_cache.lock().await;
            if let Some(vector) = cache.get(query) {
                return Ok(vector.clone());
            }
        }
        let vector = self.embedder.embed_for_query(query).await?;
        let mut cache = self.query_cache.lock().await;
        cache.put(query.to_string(), vector.clone());
        Ok(vector)
    }

    /// Fire-and-forget salience bump for query hits.
    fn spawn_reinforcement(self: &Arc<Self>, ids: Vec<String>, boost: f64) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            for id in ids {
                if let Err(e) = engine.reinforce(&id, boost).await {
                    debug!(id = %id, "reinforcement skipped: {}", e);
                }
            }
        });
    }

    // ========================================================================
    // SINGLE-MEMORY OPERATIONS
    // ========================================================================

    /// Load one memory, enforcing namespace scoping when the request names
    /// namespaces.
    pub async fn get(&self, id: &str, namespaces: &[String]) -> Result<Memory> {
        let memory = self
            .store
            .get_memory(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if !namespaces.is_empty() && !memory.visible_to(namespaces) {
            return Err(EngineError::NamespaceAccess(id.to_string()));
        }
        Ok(memory)
    }

    /// Update content/tags/metadata. A content change re-routes the memory
    /// and re-embeds its active sectors.
    pub async fn update(self: &Arc<Self>, id: &str, patch: UpdateInput) -> Result<Memory> {
        let _lock = self.id_locks.lock(id).await;
        let mut memory = self
            .store
            .get_memory(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        let now = chrono::Utc::now().timestamp();
        let content_changed = match &patch.content {
            Some(content) if content.trim().is_empty() => {
                return Err(EngineError::Validation("content cannot be empty".to_string()))
            }
            Some(content) => {
                if *content != memory.content {
                    memory.content = content.clone();
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if let Some(tags) = patch.tags {
            memory.tags = tags;
        }
        if let Some(metadata) = patch.metadata {
            memory.metadata = metadata;
        }
        memory.updated_at = now;

        if content_changed {
            let classification =
                self.router
                    .classify(&memory.content, &memory.tags, &memory.metadata);
            let embedded = self
                .embedder
                .embed_sectors(&memory.content, &classification.active)
                .await?;
            memory.primary_sector = classification.primary;
            memory.sectors = classification.active;
            memory.fingerprinted = false;
            memory.summary = None;
            memory.needs_reembed = embedded.iter().any(|(_, o)| o.fallback);

            let mut vector_meta = Vec::new();
            let mut points = Vec::new();
            for namespace in &memory.namespaces {
                // Clear stale sector vectors before upserting the new set
                self.vectors.delete(namespace, id, None).await?;
                for (sector, outcome) in &embedded {
                    vector_meta.push(VectorMeta {
                        memory_id: id.to_string(),
                        sector: *sector,
                        namespace: namespace.clone(),
                        dim: outcome.vector.len(),
                        created_at: now,
                    });
                    points.push((
                        namespace.clone(),
                        VectorPoint {
                            memory_id: id.to_string(),
                            sector: *sector,
                            vector: outcome.vector.clone(),
                        },
                    ));
                }
            }
            self.store.replace_vector_meta(id, &vector_meta).await?;
            self.vectors.batch_upsert(points).await?;
        }

        self.store.update_memory(&memory).await?;
        Ok(memory)
    }

    /// Delete a memory everywhere: metadata row, vectors in each of its
    /// namespaces, and any waypoints touching it.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let _lock = self.id_locks.lock(id).await;
        let Some(memory) = self.store.get_memory(id).await? else {
            return Ok(false);
        };
        let deleted = self.store.delete_memory(id).await?;
        for namespace in &memory.namespaces {
            if let Err(e) = self.vectors.delete(namespace, id, None).await {
                warn!(id, namespace = %namespace, "vector cleanup failed after delete: {}", e);
            }
        }
        Ok(deleted)
    }

    /// Bump salience and refresh `last_seen_at`. Returns the new salience.
    pub async fn reinforce(&self, id: &str, boost: f64) -> Result<f64> {
        let _lock = self.id_locks.lock(id).await;
        let memory = self
            .store
            .get_memory(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let now = chrono::Utc::now().timestamp();
        let new_salience = salience::reinforced(memory.salience_at(now), boost);
        self.store
            .apply_reinforcement(id, new_salience, now)
            .await?;

        // A hit on a fingerprinted memory queues it for regeneration
        if memory.fingerprinted && self.config.regeneration_enabled && !memory.needs_reembed {
            self.store
                .set_flags(
                    id,
                    MemoryFlags {
                        needs_reembed: Some(true),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(new_salience)
    }

    /// Compress a cold memory: summary-only mode rewrites the content and
    /// collapses the per-sector vectors into one centroid embedded from the
    /// summary, kept under the primary sector; otherwise only the flag is
    /// set.
    pub async fn fingerprint(&self, id: &str) -> Result<()> {
        let _lock = self.id_locks.lock(id).await;
        let memory = self
            .store
            .get_memory(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if memory.fingerprinted {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();

        if self.config.use_summary_only {
            let summary = salience::fingerprint_content(
                &memory.content,
                memory.summary.as_deref(),
                self.config.summary_max_length,
            );
            self.store.apply_fingerprint(id, &summary, now).await?;

            let embedded = self
                .embedder
                .embed_sectors(&summary, &memory.sectors)
                .await?;
            let vectors: Vec<Vec<f32>> =
                embedded.into_iter().map(|(_, outcome)| outcome.vector).collect();
            let centroid = crate::embed::centroid(&vectors);
            for namespace in &memory.namespaces {
                self.vectors.delete(namespace, id, None).await?;
                if !centroid.is_empty() {
                    self.vectors
                        .upsert(
                            namespace,
                            VectorPoint {
                                memory_id: id.to_string(),
                                sector: memory.primary_sector,
                                vector: centroid.clone(),
                            },
                        )
                        .await?;
                }
            }
        } else {
            self.store
                .set_flags(
                    id,
                    MemoryFlags {
                        fingerprinted: Some(true),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Re-embed a memory that carries a synthetic or fingerprinted vector.
    /// Returns false (leaving the flag set) when the provider is still down.
    pub async fn regenerate(&self, memory: &Memory) -> Result<bool> {
        let text = memory
            .summary
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&memory.content);
        let vector = match self.embedder.embed_for_query(text).await {
            Ok(v) => v,
            Err(e) => {
                debug!(id = %memory.id, "regeneration deferred, provider unavailable: {}", e);
                return Ok(false);
            }
        };

        let _lock = self.id_locks.lock(&memory.id).await;
        let mut points = Vec::new();
        for namespace in &memory.namespaces {
            points.push((
                namespace.clone(),
                VectorPoint {
                    memory_id: memory.id.clone(),
                    sector: memory.primary_sector,
                    vector: vector.clone(),
                },
            ));
        }
        self.vectors.batch_upsert(points).await?;
        self.store
            .set_flags(
                &memory.id,
                MemoryFlags {
                    needs_reembed: Some(false),
                    ..Default::default()
                },
            )
            .await?;
        Ok(true)
    }

    // ========================================================================
    // LISTING AND STATS
    // ========================================================================

    pub async fn list(
        &self,
        namespace: Option<&str>,
        sector: Option<Sector>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Memory>> {
        Ok(self
            .store
            .list_memories(namespace, sector, offset, limit.clamp(1, 500))
            .await?)
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        Ok(MemoryStats {
            total_memories: self.store.count_memories().await?,
            namespaces: self.store.count_by_namespace().await?,
            sectors: self.store.count_by_sector().await?,
            embed_fallbacks: self.store.stat_total("embed_fallback").await?,
            fingerprinted: self.store.count_fingerprinted().await?,
        })
    }
}

// ============================================================================
// HELPERS
// ============================================================================

struct ScoredCandidate {
    memory: Memory,
    score: f64,
    primary_hit: Sector,
    hit_sectors: Vec<Sector>,
    path: Vec<String>,
}

fn normalized_namespaces(requested: &[String]) -> Vec<String> {
    let filtered: Vec<String> = requested
        .iter()
        .filter(|ns| !ns.trim().is_empty())
        .cloned()
        .collect();
    if filtered.is_empty() {
        vec![DEFAULT_NAMESPACE.to_string()]
    } else {
        filtered
    }
}

fn passes_filters(memory: &Memory, filters: &QueryFilters, now: i64) -> bool {
    if let Some(min) = filters.min_salience {
        if memory.salience_at(now) < min {
            return false;
        }
    }
    if let Some(tags) = &filters.tags {
        if !tags.is_empty() && !tags.iter().any(|t| memory.tags.contains(t)) {
            return false;
        }
    }
    true
}

// ============================================================================
// TESTS
// ============================================================================
