//! In-process vector store
//!
//! HNSW indexes (usearch) held in memory, one per (collection, sector).
//! Sub-millisecond queries, incremental updates, cosine metric over
//! pre-normalized vectors.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashSet;
use sha2::{Digest, Sha256};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::{
    sanitize_namespace, Result, VectorHit, VectorPoint, VectorStore, VectorStoreError,
    VectorStoreStats,
};
use crate::memory::Sector;

/// HNSW connectivity parameter (higher = better recall, more memory)
const CONNECTIVITY: usize = 16;

/// HNSW expansion factor for index building
const EXPANSION_ADD: usize = 100;

/// HNSW expansion factor for search
const EXPANSION_SEARCH: usize = 64;

/// usearch indexes must hold reserved capacity before an insert; grow in
/// fixed chunks so a burst of writes reserves once.
const CAPACITY_CHUNK: usize = 64;

/// Stable u64 point key derived from a digest of the memory id. Keys
/// survive restarts and retries, so upserts never need an id counter.
fn point_key(memory_id: &str) -> u64 {
    let digest = Sha256::digest(memory_id.as_bytes());
    u64::from_le_bytes([
        digest[0], digest[1], digest[2], digest[3],
        digest[4], digest[5], digest[6], digest[7],
    ])
}

// ============================================================================
// SECTOR INDEX
// ============================================================================

/// One HNSW index per (collection, sector), with a single key -> memory-id
/// table for translating search results back to ids.
struct SectorIndex {
    index: Index,
    points: HashMap<u64, String>,
    dimensions: usize,
}

impl SectorIndex {
    fn new(dimensions: usize) -> Result<Self> {
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: CONNECTIVITY,
            expansion_add: EXPANSION_ADD,
            expansion_search: EXPANSION_SEARCH,
            multi: false,
        };
        let index = Index::new(&options).map_err(|e| VectorStoreError::Index(e.to_string()))?;
        Ok(Self {
            index,
            points: HashMap::new(),
            dimensions,
        })
    }

    fn check_dimensions(&self, got: usize) -> Result<()> {
        if got != self.dimensions {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimensions,
                got,
            });
        }
        Ok(())
    }

    fn ensure_capacity(&self, additional: usize) -> Result<()> {
        let needed = self.index.size() + additional;
        if needed > self.index.capacity() {
            let target = needed.next_multiple_of(CAPACITY_CHUNK);
            self.index
                .reserve(target)
                .map_err(|e| VectorStoreError::Index(format!("reserve failed: {}", e)))?;
        }
        Ok(())
    }

    /// Insert or replace the vector for a memory id.
    fn upsert(&mut self, memory_id: &str, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector.len())?;
        let key = point_key(memory_id);
        if self.points.contains_key(&key) {
            self.index
                .remove(key)
                .map_err(|e| VectorStoreError::Index(e.to_string()))?;
        }
        self.ensure_capacity(1)?;
        self.index
            .add(key, vector)
            .map_err(|e| VectorStoreError::Index(e.to_string()))?;
        self.points.insert(key, memory_id.to_string());
        Ok(())
    }

    fn remove(&mut self, memory_id: &str) -> Result<bool> {
        let key = point_key(memory_id);
        match self.points.remove(&key) {
            Some(_) => {
                self.index
                    .remove(key)
                    .map_err(|e| VectorStoreError::Index(e.to_string()))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Cosine top-n, translated back to memory ids.
    fn top_n(&self, query: &[f32], n: usize) -> Result<Vec<(String, f32)>> {
        self.check_dimensions(query.len())?;
        if self.points.is_empty() {
            return Ok(vec![]);
        }
        let matches = self
            .index
            .search(query, n)
            .map_err(|e| VectorStoreError::Index(e.to_string()))?;
        Ok(matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .filter_map(|(key, distance)| {
                // usearch reports cosine distance; callers want similarity
                self.points
                    .get(key)
                    .map(|memory_id| (memory_id.clone(), 1.0 - distance))
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.points.len()
    }
}

// ============================================================================
// IN-PROCESS STORE
// ============================================================================

/// Per-namespace map of per-sector indexes behind one lock. Queries and
/// writes both finish in microseconds, so a single mutex is not a bottleneck
/// at the concurrency levels the engine caps at.
pub struct InProcVectorStore {
    dimensions: usize,
    prefix: String,
    collections: Mutex<HashMap<String, HashMap<Sector, SectorIndex>>>,
    created: DashSet<String>,
}

impl InProcVectorStore {
    pub fn new(dimensions: usize, prefix: impl Into<String>) -> Self {
        Self {
            dimensions,
            prefix: prefix.into(),
            collections: Mutex::new(HashMap::new()),
            created: DashSet::new(),
        }
    }

    fn collection_name(&self, namespace: &str) -> String {
        format!("{}{}", self.prefix, sanitize_namespace(namespace))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, HashMap<Sector, SectorIndex>>>> {
        self.collections
            .lock()
            .map_err(|_| VectorStoreError::Index("collections lock poisoned".to_string()))
    }
}

#[async_trait]
impl VectorStore for InProcVectorStore {
    async fn ensure_collection(&self, namespace: &str) -> Result<()> {
        let name = self.collection_name(namespace);
        if self.created.contains(&name) {
            return Ok(());
        }
        let mut collections = self.lock()?;
        collections.entry(name.clone()).or_default();
        self.created.insert(name);
        Ok(())
    }

    async fn upsert(&self, namespace: &str, point: VectorPoint) -> Result<()> {
        let name = self.collection_name(namespace);
        let mut collections = self.lock()?;
        let collection = collections.entry(name.clone()).or_default();
        let index = match collection.entry(point.sector) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(SectorIndex::new(self.dimensions)?)
            }
        };
        index.upsert(&point.memory_id, &point.vector)?;
        drop(collections);
        self.created.insert(name);
        Ok(())
    }

    async fn batch_upsert(&self, points: Vec<(String, VectorPoint)>) -> Result<()> {
        // Group by namespace so each collection is touched once
        let mut grouped: HashMap<String, Vec<VectorPoint>> = HashMap::new();
        for (namespace, point) in points {
            grouped.entry(namespace).or_default().push(point);
        }
        for (namespace, points) in grouped {
            for point in points {
                self.upsert(&namespace, point).await?;
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        namespace: &str,
        sector: Sector,
        query: &[f32],
        top_n: usize,
    ) -> Result<Vec<VectorHit>> {
        let name = self.collection_name(namespace);
        let collections = self.lock()?;
        let Some(collection) = collections.get(&name) else {
            return Ok(vec![]);
        };
        let Some(index) = collection.get(&sector) else {
            return Ok(vec![]);
        };
        let hits = index.top_n(query, top_n)?;
        Ok(hits
            .into_iter()
            .map(|(memory_id, score)| VectorHit {
                memory_id,
                sector,
                score,
            })
            .collect())
    }

    async fn delete(&self, namespace: &str, memory_id: &str, sector: Option<Sector>) -> Result<()> {
        let name = self.collection_name(namespace);
        let mut collections = self.lock()?;
        let Some(collection) = collections.get_mut(&name) else {
            return Ok(());
        };
        match sector {
            Some(sector) => {
                if let Some(index) = collection.get_mut(&sector) {
                    index.remove(memory_id)?;
                }
            }
            None => {
                for index in collection.values_mut() {
                    index.remove(memory_id)?;
                }
            }
        }
        Ok(())
    }

    async fn batch_delete(
        &self,
        namespace: &str,
        memory_ids: &[String],
        sector: Option<Sector>,
    ) -> Result<()> {
        for memory_id in memory_ids {
            self.delete(namespace, memory_id, sector).await?;
        }
        Ok(())
    }

    async fn stats(&self, namespace: Option<&str>) -> Result<VectorStoreStats> {
        let collections = self.lock()?;
        let mut stats = VectorStoreStats::default();
        let filter = namespace.map(|ns| self.collection_name(ns));
        for (name, collection) in collections.iter() {
            if let Some(f) = &filter {
                if name != f {
                    continue;
                }
            }
            let count: usize = collection.values().map(SectorIndex::len).sum();
            stats.collections.insert(name.clone(), count);
            stats.total_points += count;
        }
        Ok(stats)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DIM: usize = 16;

    fn store() -> InProcVectorStore {
        InProcVectorStore::new(DIM, "openmemory_vectors_")
    }

    #[test]
    fn test_point_key_is_stable() {
        assert_eq!(point_key("m1"), point_key("m1"));
        assert_ne!(point_key("m1"), point_key("m2"));
    }

    fn unit_vector(seed: f32) -> Vec<f32> {
        let mut v: Vec<f32> = (0..DIM).map(|i| ((i as f32 + seed) * 0.37).sin()).collect();
        crate::embed::normalize(&mut v);
        v
    }

    fn point(id: &str, sector: Sector, seed: f32) -> VectorPoint {
        VectorPoint {
            memory_id: id.to_string(),
            sector,
            vector: unit_vector(seed),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_search() {
        let store = store();
        store
            .upsert("global", point("m1", Sector::Semantic, 1.0))
            .await
            .unwrap();
        store
            .upsert("global", point("m2", Sector::Semantic, 50.0))
            .await
            .unwrap();

        let hits = store
            .search("global", Sector::Semantic, &unit_vector(1.0), 2)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].memory_id, "m1");
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_missing_collection_returns_empty() {
        let store = store();
        let hits = store
            .search("nowhere", Sector::Semantic, &unit_vector(1.0), 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_sector_separation_within_collection() {
        let store = store();
        store
            .upsert("global", point("m1", Sector::Episodic, 1.0))
            .await
            .unwrap();
        let semantic_hits = store
            .search("global", Sector::Semantic, &unit_vector(1.0), 5)
            .await
            .unwrap();
        assert!(semantic_hits.is_empty());
        let episodic_hits = store
            .search("global", Sector::Episodic, &unit_vector(1.0), 5)
            .await
            .unwrap();
        assert_eq!(episodic_hits.len(), 1);
    }

    #[tokio::test]
    async fn test_namespace_collections_are_isolated() {
        let store = store();
        store
            .upsert("alice", point("m1", Sector::Semantic, 1.0))
            .await
            .unwrap();
        store
            .upsert("bob", point("m2", Sector::Semantic, 1.0))
            .await
            .unwrap();

        let alice = store
            .search("alice", Sector::Semantic, &unit_vector(1.0), 10)
            .await
            .unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].memory_id, "m1");

        let bob = store
            .search("bob", Sector::Semantic, &unit_vector(1.0), 10)
            .await
            .unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].memory_id, "m2");
    }

    #[tokio::test]
    async fn test_upsert_same_key_replaces() {
        let store = store();
        store
            .upsert("global", point("m1", Sector::Semantic, 1.0))
            .await
            .unwrap();
        store
            .upsert("global", point("m1", Sector::Semantic, 9.0))
            .await
            .unwrap();

        let stats = store.stats(Some("global")).await.unwrap();
        assert_eq!(stats.total_points, 1);

        let hits = store
            .search("global", Sector::Semantic, &unit_vector(9.0), 1)
            .await
            .unwrap();
        assert_eq!(hits[0].memory_id, "m1");
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_delete_all_sectors() {
        let store = store();
        store
            .upsert("global", point("m1", Sector::Semantic, 1.0))
            .await
            .unwrap();
        store
            .upsert("global", point("m1", Sector::Episodic, 2.0))
            .await
            .unwrap();

        store.delete("global", "m1", None).await.unwrap();
        let stats = store.stats(None).await.unwrap();
        assert_eq!(stats.total_points, 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = store();
        let bad = VectorPoint {
            memory_id: "m1".to_string(),
            sector: Sector::Semantic,
            vector: vec![1.0, 2.0],
        };
        assert!(matches!(
            store.upsert("global", bad).await,
            Err(VectorStoreError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_upsert_groups_by_namespace() {
        let store = store();
        store
            .batch_upsert(vec![
                ("alice".to_string(), point("m1", Sector::Semantic, 1.0)),
                ("bob".to_string(), point("m2", Sector::Semantic, 2.0)),
                ("alice".to_string(), point("m3", Sector::Semantic, 3.0)),
            ])
            .await
            .unwrap();

        let stats = store.stats(None).await.unwrap();
        assert_eq!(stats.total_points, 3);
        assert_eq!(
            stats.collections.get("openmemory_vectors_alice"),
            Some(&2)
        );
        assert_eq!(stats.collections.get("openmemory_vectors_bob"), Some(&1));
    }
}
