//! End-to-end engine tests: write path, hybrid retrieval, namespace
//! isolation, salience lifecycle, and temporal facts against the embedded
//! metadata store and the in-process vector store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use openmemory_core::engine::UpdateInput;
use openmemory_core::memory::{Memory, QueryFilters, QueryInput, Sector, StoreInput};
use openmemory_core::store::{MemoryFlags, MetadataStore};
use openmemory_core::temporal::{FactInput, TemporalFacts};
use openmemory_core::vector::VectorStore;
use openmemory_core::{
    Config, EmbedError, Embedder, EmbedderHandle, EngineError, HsgEngine, InProcVectorStore,
    SqliteStore,
};

const DIM: usize = 64;

fn test_config() -> Config {
    let mut config = Config::default();
    config.vec_dim = DIM;
    config.resolve_tier();
    config
}

fn build_engine(config: Config, dir: &TempDir) -> Arc<HsgEngine> {
    let config = Arc::new(config);
    let store = Arc::new(SqliteStore::open(dir.path().join("engine.db")).unwrap());
    let vectors = Arc::new(InProcVectorStore::new(
        config.vec_dim,
        config.collection_prefix.clone(),
    ));
    let embedder = Arc::new(EmbedderHandle::from_config(&config));
    Arc::new(HsgEngine::new(config, store, vectors, embedder))
}

fn engine() -> (Arc<HsgEngine>, TempDir) {
    let dir = TempDir::new().unwrap();
    let engine = build_engine(test_config(), &dir);
    (engine, dir)
}

fn store_input(content: &str, namespaces: &[&str]) -> StoreInput {
    StoreInput {
        content: content.to_string(),
        namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

fn query_input(query: &str, k: usize, namespaces: &[&str]) -> QueryInput {
    QueryInput {
        query: query.to_string(),
        k,
        filters: QueryFilters {
            namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        },
    }
}

// ============================================================================
// WRITE PATH + ROUND-TRIP
// ============================================================================

#[tokio::test]
async fn round_trip_returns_stored_id_at_rank_one() {
    // S1: no namespace -> global, factual content -> semantic sector
    let (engine, _dir) = engine();
    let receipt = engine
        .store_memory(store_input("Paris is the capital of France", &[]))
        .await
        .unwrap();
    assert_eq!(receipt.namespaces, vec!["global"]);
    assert_eq!(receipt.primary_sector, Sector::Semantic);
    assert!(!receipt.pending_vector);

    let response = engine
        .query(query_input("Paris is the capital of France", 1, &[]))
        .await
        .unwrap();
    assert_eq!(response.matches.len(), 1);
    assert_eq!(response.matches[0].id, receipt.id);
    assert!(response.matches[0].score >= engine.config().min_score);
}

#[tokio::test]
async fn empty_content_is_rejected() {
    let (engine, _dir) = engine();
    let err = engine.store_memory(store_input("   ", &[])).await;
    assert!(matches!(err, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn sector_coverage_matches_vector_meta() {
    // Invariant 2: vector rows per memory equal its sectors field
    let (engine, _dir) = engine();
    let receipt = engine
        .store_memory(store_input(
            "Install the toolchain, then run step 1 of the setup",
            &["ops"],
        ))
        .await
        .unwrap();

    let meta = engine.store().vector_meta_for(&receipt.id).await.unwrap();
    let meta_sectors: std::collections::HashSet<Sector> =
        meta.iter().map(|m| m.sector).collect();
    let declared: std::collections::HashSet<Sector> = receipt.sectors.iter().copied().collect();
    assert_eq!(meta_sectors, declared);
    assert!(declared.contains(&receipt.primary_sector));
}

#[tokio::test]
async fn query_k_is_clamped() {
    let (engine, _dir) = engine();
    for i in 0..5 {
        engine
            .store_memory(store_input(&format!("fact number {}", i), &[]))
            .await
            .unwrap();
    }
    let response = engine.query(query_input("fact number", 500, &[])).await.unwrap();
    assert!(response.matches.len() <= 32);

    let response = engine.query(query_input("fact number", 0, &[])).await.unwrap();
    assert_eq!(response.matches.len(), 1);
}

// ============================================================================
// NAMESPACE ISOLATION
// ============================================================================

#[tokio::test]
async fn same_content_in_two_namespaces_stays_isolated() {
    // S2 + invariants 1 and 10
    let (engine, _dir) = engine();
    let alice = engine
        .store_memory(store_input("the launch code is blue", &["alice"]))
        .await
        .unwrap();
    let bob = engine
        .store_memory(store_input("the launch code is blue", &["bob"]))
        .await
        .unwrap();

    let response = engine
        .query(query_input("launch code", 8, &["alice"]))
        .await
        .unwrap();
    assert_eq!(response.matches.len(), 1);
    assert_eq!(response.matches[0].id, alice.id);
    assert!(response.matches.iter().all(|m| m.id != bob.id));
}

#[tokio::test]
async fn get_enforces_namespace_scoping() {
    let (engine, _dir) = engine();
    let receipt = engine
        .store_memory(store_input("private note", &["alice"]))
        .await
        .unwrap();

    // Scoped to the right namespace: visible
    assert!(engine.get(&receipt.id, &["alice".to_string()]).await.is_ok());
    // Scoped elsewhere: reads as not-found, not as forbidden
    let err = engine.get(&receipt.id, &["bob".to_string()]).await;
    assert!(matches!(err, Err(EngineError::NamespaceAccess(_))));
    // Unscoped get is allowed
    assert!(engine.get(&receipt.id, &[]).await.is_ok());
}

#[tokio::test]
async fn concurrent_stores_create_one_namespace_row() {
    // Invariant 9
    let (engine, _dir) = engine();
    let mut handles = Vec::new();
    for i in 0..24 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .store_memory(store_input(&format!("item {}", i), &["novel"]))
                .await
                .unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let namespaces = engine.store().list_namespaces().await.unwrap();
    let novel: Vec<_> = namespaces.iter().filter(|n| n.namespace == "novel").collect();
    assert_eq!(novel.len(), 1);
    assert_eq!(engine.store().count_memories().await.unwrap(), 24);
}

#[tokio::test]
async fn concurrent_multi_namespace_ingest_preserves_isolation() {
    // S6 sized down: 100 memories across 10 namespaces
    let (engine, _dir) = engine();
    let mut handles = Vec::new();
    for i in 0..100 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let ns = format!("tenant{}", i % 10);
            engine
                .store_memory(store_input(&format!("tenant record {}", i), &[&ns]))
                .await
                .unwrap()
        }));
    }
    let mut receipts = Vec::new();
    for h in handles {
        receipts.push(h.await.unwrap());
    }

    assert_eq!(engine.store().count_memories().await.unwrap(), 100);
    let labels = engine.store().list_namespace_labels().await.unwrap();
    assert_eq!(labels.len(), 10);

    let expected_points: usize = receipts
        .iter()
        .map(|r| r.sectors.len() * r.namespaces.len())
        .sum();
    let stats = engine.vectors().stats(None).await.unwrap();
    assert_eq!(stats.total_points, expected_points);
    assert_eq!(stats.collections.len(), 10);

    // Spot-check cross-tenant leakage
    let response = engine
        .query(query_input("tenant record", 32, &["tenant3"]))
        .await
        .unwrap();
    assert!(!response.matches.is_empty());
    for m in &response.matches {
        let memory = engine.get(&m.id, &[]).await.unwrap();
        assert!(memory.namespaces.contains(&"tenant3".to_string()));
    }
}

// ============================================================================
// SALIENCE LIFECYCLE
// ============================================================================

#[tokio::test]
async fn reinforcement_is_monotonic_and_bounded() {
    // Invariants 3 and 4
    let (engine, _dir) = engine();
    let receipt = engine
        .store_memory(store_input("reinforce me", &[]))
        .await
        .unwrap();

    let before = engine.get(&receipt.id, &[]).await.unwrap();
    let s1 = engine.reinforce(&receipt.id, 0.2).await.unwrap();
    assert!(s1 >= before.salience - 1e-9);

    // Saturates at 1.0
    for _ in 0..10 {
        engine.reinforce(&receipt.id, 0.3).await.unwrap();
    }
    let after = engine.get(&receipt.id, &[]).await.unwrap();
    assert!(after.salience <= 1.0);
    assert!(after.last_seen_at >= before.last_seen_at);
}

#[tokio::test]
async fn min_salience_filter_drops_cold_candidates() {
    let (engine, _dir) = engine();
    let receipt = engine
        .store_memory(store_input("barely warm memory", &[]))
        .await
        .unwrap();

    let mut input = query_input("barely warm memory", 8, &[]);
    input.filters.min_salience = Some(0.99);
    let response = engine.query(input).await.unwrap();
    assert!(response.matches.iter().all(|m| m.id != receipt.id));
}

#[tokio::test]
async fn fingerprint_replaces_content_with_summary() {
    // S3 mechanism: summary-only mode rewrites cold content
    let dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.use_summary_only = true;
    config.summary_max_length = 80;
    let engine = build_engine(config, &dir);

    let long_content = "The migration to the new storage cluster failed on Tuesday. \
                        The certificate had expired and every retry masked the root cause. \
                        Rotating the certificate restored the pipeline and the backfill \
                        completed overnight without further incidents."
        .to_string();
    let receipt = engine
        .store_memory(store_input(&long_content, &["ops"]))
        .await
        .unwrap();

    engine.fingerprint(&receipt.id).await.unwrap();

    let memory = engine.get(&receipt.id, &[]).await.unwrap();
    assert!(memory.fingerprinted);
    assert!(memory.content.chars().count() <= 80);
    assert_ne!(memory.content, long_content);

    // Only the primary sector's vector survives
    let stats = engine.vectors().stats(Some("ops")).await.unwrap();
    assert_eq!(stats.total_points, 1);

    // Fingerprinting twice is a no-op
    engine.fingerprint(&receipt.id).await.unwrap();
}

#[tokio::test]
async fn fingerprinted_hit_queues_regeneration() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.use_summary_only = true;
    let engine = build_engine(config, &dir);

    let receipt = engine
        .store_memory(store_input(
            "A long operational incident report that will go cold and be compressed",
            &[],
        ))
        .await
        .unwrap();
    engine.fingerprint(&receipt.id).await.unwrap();

    engine.reinforce(&receipt.id, 0.1).await.unwrap();
    let memory = engine.get(&receipt.id, &[]).await.unwrap();
    assert!(memory.needs_reembed);

    // Regeneration restores the primary vector and clears the flag
    let restored = engine.regenerate(&memory).await.unwrap();
    assert!(restored);
    let memory = engine.get(&receipt.id, &[]).await.unwrap();
    assert!(!memory.needs_reembed);
}

#[tokio::test]
async fn synthetic_fallback_keeps_write_path_alive() {
    // S5: provider down -> write succeeds, fallback is observable
    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        fn provider_name(&self) -> &'static str {
            "down"
        }
        fn dimensions(&self) -> usize {
            DIM
        }
        async fn embed(
            &self,
            _text: &str,
            _sector: Option<Sector>,
        ) -> Result<Vec<f32>, EmbedError> {
            Err(EmbedError::Provider("connection refused".to_string()))
        }
    }

    let dir = TempDir::new().unwrap();
    let config = Arc::new(test_config());
    let store = Arc::new(SqliteStore::open(dir.path().join("engine.db")).unwrap());
    let vectors = Arc::new(InProcVectorStore::new(
        config.vec_dim,
        config.collection_prefix.clone(),
    ));
    let embedder = Arc::new(EmbedderHandle::new(Arc::new(DownEmbedder), &config));
    let engine = Arc::new(HsgEngine::new(config, store, vectors, embedder));

    let receipt = engine.store_memory(store_input("hello", &[])).await.unwrap();
    let memory = engine.get(&receipt.id, &[]).await.unwrap();
    assert!(memory.needs_reembed);
    assert_eq!(engine.store().stat_total("embed_fallback").await.unwrap(), 1);
    assert_eq!(engine.stats().await.unwrap().embed_fallbacks, 1);

    // Queries fail while the provider is down
    assert!(matches!(
        engine.query(query_input("hello", 1, &[])).await,
        Err(EngineError::Embed(_))
    ));
}

// ============================================================================
// UPDATE / DELETE
// ============================================================================

#[tokio::test]
async fn update_reroutes_and_reembeds_on_content_change() {
    let (engine, _dir) = engine();
    let receipt = engine
        .store_memory(store_input("Paris is the capital of France", &[]))
        .await
        .unwrap();

    let updated = engine
        .update(
            &receipt.id,
            UpdateInput {
                content: Some("I feel so happy and excited about this release".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.primary_sector, Sector::Emotional);

    // Old content no longer retrieves the memory at rank 1, new content does
    let response = engine
        .query(query_input("I feel so happy and excited about this release", 1, &[]))
        .await
        .unwrap();
    assert_eq!(response.matches[0].id, receipt.id);
}

#[tokio::test]
async fn delete_cascades_to_vectors() {
    let (engine, _dir) = engine();
    let receipt = engine
        .store_memory(store_input("disposable memory", &["tmp"]))
        .await
        .unwrap();
    assert!(engine.delete(&receipt.id).await.unwrap());
    assert!(!engine.delete(&receipt.id).await.unwrap());

    assert!(matches!(
        engine.get(&receipt.id, &[]).await,
        Err(EngineError::NotFound(_))
    ));
    let stats = engine.vectors().stats(Some("tmp")).await.unwrap();
    assert_eq!(stats.total_points, 0);
}

// ============================================================================
// WAYPOINT EXPANSION
// ============================================================================

#[tokio::test]
async fn waypoint_expansion_injects_linked_memory() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.expand_threshold = 0.1;
    let engine = build_engine(config, &dir);

    let src = engine
        .store_memory(store_input("the database migration plan", &[]))
        .await
        .unwrap();
    assert_eq!(src.primary_sector, Sector::Semantic);
    // The target lives in a different sector so the sector-filtered search
    // below cannot reach it directly; only the waypoint can inject it.
    let dst = engine
        .store_memory(store_input(
            "I feel joyful and excited about this wonderful recipe",
            &[],
        ))
        .await
        .unwrap();
    assert_eq!(dst.primary_sector, Sector::Emotional);

    let now = chrono::Utc::now().timestamp();
    engine
        .store()
        .upsert_waypoint(&openmemory_core::Waypoint {
            src_id: src.id.clone(),
            dst_id: dst.id.clone(),
            namespace: "global".to_string(),
            weight: 1.0,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    let mut input = query_input("the database migration plan", 8, &[]);
    input.filters.sectors = Some(vec![Sector::Semantic]);
    let response = engine.query(input).await.unwrap();
    let expanded = response
        .matches
        .iter()
        .find(|m| m.id == dst.id)
        .expect("waypoint target injected");
    assert_eq!(expanded.path, vec![src.id.clone()]);
    // Damped, never above its source
    let src_score = response.matches.iter().find(|m| m.id == src.id).unwrap().score;
    assert!(expanded.score <= src_score);
}

#[tokio::test]
async fn waypoint_uniqueness_per_source_and_namespace() {
    // Invariant 8
    let (engine, _dir) = engine();
    let now = chrono::Utc::now().timestamp();
    for dst in ["d1", "d2"] {
        engine
            .store()
            .upsert_waypoint(&openmemory_core::Waypoint {
                src_id: "s".to_string(),
                dst_id: dst.to_string(),
                namespace: "global".to_string(),
                weight: 0.5,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }
    let wp = engine
        .store()
        .get_waypoint("s", "global")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wp.dst_id, "d2");
}

// ============================================================================
// TEMPORAL FACTS (S4)
// ============================================================================

#[tokio::test]
async fn temporal_facts_point_in_time() {
    let (engine, _dir) = engine();
    let facts = TemporalFacts::new(Arc::clone(engine.store()));

    // 2023-01-01 and 2023-11-20 as unix seconds
    let jan = 1_672_531_200;
    let nov = 1_700_438_400;
    facts
        .insert(FactInput {
            subject: "OpenAI".to_string(),
            predicate: "has_CEO".to_string(),
            object: "Sam".to_string(),
            namespace: None,
            valid_from: Some(jan),
            valid_to: None,
            confidence: Some(1.0),
        })
        .await
        .unwrap();
    facts
        .insert(FactInput {
            subject: "OpenAI".to_string(),
            predicate: "has_CEO".to_string(),
            object: "Mira".to_string(),
            namespace: None,
            valid_from: Some(nov),
            valid_to: None,
            confidence: Some(1.0),
        })
        .await
        .unwrap();

    let june = 1_685_577_600; // 2023-06-01
    let december = 1_701_388_800; // 2023-12-01
    let at_june = facts
        .query_at(Some("OpenAI"), Some("has_CEO"), Some(june), "global")
        .await
        .unwrap();
    assert_eq!(at_june.len(), 1);
    assert_eq!(at_june[0].object, "Sam");

    let at_december = facts
        .query_at(Some("OpenAI"), Some("has_CEO"), Some(december), "global")
        .await
        .unwrap();
    assert_eq!(at_december.len(), 1);
    assert_eq!(at_december[0].object, "Mira");
}

// ============================================================================
// LENIENT WRITES + STATS
// ============================================================================

#[tokio::test]
async fn lenient_write_survives_vector_store_failure() {
    struct BrokenVectors;

    #[async_trait]
    impl VectorStore for BrokenVectors {
        async fn ensure_collection(
            &self,
            _namespace: &str,
        ) -> openmemory_core::vector::Result<()> {
            Ok(())
        }
        async fn upsert(
            &self,
            _namespace: &str,
            _point: openmemory_core::VectorPoint,
        ) -> openmemory_core::vector::Result<()> {
            Err(openmemory_core::VectorStoreError::Transport("down".to_string()))
        }
        async fn batch_upsert(
            &self,
            _points: Vec<(String, openmemory_core::VectorPoint)>,
        ) -> openmemory_core::vector::Result<()> {
            Err(openmemory_core::VectorStoreError::Transport("down".to_string()))
        }
        async fn search(
            &self,
            _namespace: &str,
            _sector: Sector,
            _query: &[f32],
            _top_n: usize,
        ) -> openmemory_core::vector::Result<Vec<openmemory_core::VectorHit>> {
            Ok(vec![])
        }
        async fn delete(
            &self,
            _namespace: &str,
            _memory_id: &str,
            _sector: Option<Sector>,
        ) -> openmemory_core::vector::Result<()> {
            Ok(())
        }
        async fn batch_delete(
            &self,
            _namespace: &str,
            _memory_ids: &[String],
            _sector: Option<Sector>,
        ) -> openmemory_core::vector::Result<()> {
            Ok(())
        }
        async fn stats(
            &self,
            _namespace: Option<&str>,
        ) -> openmemory_core::vector::Result<openmemory_core::VectorStoreStats> {
            Ok(Default::default())
        }
    }

    let dir = TempDir::new().unwrap();
    let config = Arc::new(test_config());
    let store = Arc::new(SqliteStore::open(dir.path().join("engine.db")).unwrap());
    let embedder = Arc::new(EmbedderHandle::from_config(&config));
    let engine = Arc::new(HsgEngine::new(
        Arc::clone(&config),
        store,
        Arc::new(BrokenVectors),
        embedder,
    ));

    // Strict write: metadata is rolled back
    let strict = engine.store_memory(store_input("strict write", &[])).await;
    assert!(matches!(strict, Err(EngineError::VectorStore(_))));
    assert_eq!(engine.store().count_memories().await.unwrap(), 0);

    // Lenient write: accepted with the pending flag
    let mut input = store_input("lenient write", &[]);
    input.lenient = true;
    let receipt = engine.store_memory(input).await.unwrap();
    assert!(receipt.pending_vector);
    let memory = engine.get(&receipt.id, &[]).await.unwrap();
    assert!(memory.pending_vector);
    assert_eq!(engine.store().stat_total("pending_vector").await.unwrap(), 1);
}

#[tokio::test]
async fn stats_aggregate_counts() {
    let (engine, _dir) = engine();
    engine.store_memory(store_input("alpha fact", &["a"])).await.unwrap();
    engine.store_memory(store_input("beta fact", &["b"])).await.unwrap();

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.total_memories, 2);
    assert_eq!(stats.namespaces.get("a"), Some(&1));
    assert_eq!(stats.namespaces.get("b"), Some(&1));
    assert_eq!(stats.embed_fallbacks, 0);
}

// ============================================================================
// LISTING
// ============================================================================

#[tokio::test]
async fn list_pages_by_namespace_and_sector() {
    let (engine, _dir) = engine();
    for i in 0..6 {
        engine
            .store_memory(store_input(&format!("note {}", i), &["pages"]))
            .await
            .unwrap();
    }
    let page1 = engine.list(Some("pages"), None, 0, 4).await.unwrap();
    let page2 = engine.list(Some("pages"), None, 4, 4).await.unwrap();
    assert_eq!(page1.len(), 4);
    assert_eq!(page2.len(), 2);

    let ids1: Vec<&String> = page1.iter().map(|m| &m.id).collect();
    assert!(page2.iter().all(|m| !ids1.contains(&&m.id)));

    let semantic = engine
        .list(Some("pages"), Some(Sector::Semantic), 0, 100)
        .await
        .unwrap();
    assert!(semantic.iter().all(|m| m.primary_sector == Sector::Semantic));
}

// ============================================================================
// FLAG HELPERS USED BY WORKERS
// ============================================================================

#[tokio::test]
async fn needs_reembed_round_trip_through_flags() {
    let (engine, _dir) = engine();
    let receipt = engine.store_memory(store_input("flag me", &[])).await.unwrap();
    engine
        .store()
        .set_flags(
            &receipt.id,
            MemoryFlags {
                needs_reembed: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let queued: Vec<Memory> = engine.store().memories_needing_reembed(10).await.unwrap();
    assert_eq!(queued.len(), 1);

    let restored = engine.regenerate(&queued[0]).await.unwrap();
    assert!(restored);
    assert!(engine.store().memories_needing_reembed(10).await.unwrap().is_empty());
}

// Keep HashMap import exercised for metadata-bearing inputs
#[tokio::test]
async fn metadata_round_trips() {
    let (engine, _dir) = engine();
    let mut metadata = HashMap::new();
    metadata.insert("source".to_string(), serde_json::json!("unit-test"));
    let receipt = engine
        .store_memory(StoreInput {
            content: "memory with metadata".to_string(),
            metadata,
            ..Default::default()
        })
        .await
        .unwrap();
    let memory = engine.get(&receipt.id, &[]).await.unwrap();
    assert_eq!(memory.metadata.get("source"), Some(&serde_json::json!("unit-test")));
}
