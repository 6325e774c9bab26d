//! Reflection - periodic consolidation of similar memories
//!
//! Every `reflect_interval` minutes, each namespace with enough entries gets
//! a pass: sample a recent window, cluster semantic-sector content by token
//! overlap with greedy farthest-point seeding, emit one derived "reflective"
//! memory per coherent cluster, link members to it with waypoints, and
//! rebuild the namespace's user summary. Idempotent: a cluster whose summary
//! overlaps an existing reflective memory by >= 85% is suppressed.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::HsgEngine;
use crate::memory::{Memory, Sector, UserSummary, Waypoint};
use crate::store::MetadataStore;
use crate::summarize::summarize;

/// Overlap ratio above which a candidate reflective memory is a duplicate.
const DUPLICATE_OVERLAP: f64 = 0.85;

/// Minimum mean pairwise overlap for a cluster to be considered coherent.
const MIN_COHERENCE: f64 = 0.15;

/// How many recent memories one pass samples per namespace.
const WINDOW_SIZE: i64 = 128;

// ============================================================================
// JOB
// ============================================================================

/// The periodic reflection scheduler.
pub struct ReflectionJob {
    engine: Arc<HsgEngine>,
    config: Arc<Config>,
}

impl ReflectionJob {
    pub fn new(engine: Arc<HsgEngine>, config: Arc<Config>) -> Self {
        Self { engine, config }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(
                self.config.reflect_interval_mins.max(1) * 60,
            ));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Skip the immediate first tick so startup stays quiet
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("reflection job stopping");
                            return;
                        }
                    }
                }
                if let Err(e) = self.run_once().await {
                    warn!("reflection pass failed: {}", e);
                }
            }
        })
    }

    /// One reflection pass over every qualifying namespace.
    pub async fn run_once(&self) -> crate::engine::Result<()> {
        let store = self.engine.store();
        let namespaces = store.list_namespace_labels().await?;
        let mut emitted_total = 0i64;

        for namespace in namespaces {
            match self.reflect_namespace(&namespace).await {
                Ok(emitted) => emitted_total += emitted,
                Err(e) => warn!(namespace = %namespace, "reflection failed for namespace: {}", e),
            }
        }

        if emitted_total > 0 {
            store.append_stat("reflections", emitted_total).await?;
            info!(emitted = emitted_total, "reflection pass complete");
        }
        Ok(())
    }

    /// Reflect one namespace; returns the number of reflective memories
    /// emitted.
    async fn reflect_namespace(&self, namespace: &str) -> crate::engine::Result<i64> {
        let store = self.engine.store();
        let window = store
            .list_memories(Some(namespace), None, 0, WINDOW_SIZE)
            .await?;

        // Leaf memories only; feeding reflections back in would compound
        let members: Vec<&Memory> = window
            .iter()
            .filter(|m| m.primary_sector != Sector::Reflective && !m.fingerprinted)
            .collect();
        if members.len() < self.config.reflect_min_memories {
            return Ok(0);
        }

        let token_sets: Vec<HashSet<String>> = members
            .iter()
            .map(|m| crate::engine::scoring::tokenize(&m.content).into_iter().collect())
            .collect();
        let clusters = cluster_by_overlap(&token_sets, self.config.max_clusters);

        let existing = store
            .list_memories(Some(namespace), Some(Sector::Reflective), 0, WINDOW_SIZE)
            .await?;
        let existing_sets: Vec<HashSet<String>> = existing
            .iter()
            .map(|m| crate::engine::scoring::tokenize(&m.content).into_iter().collect())
            .collect();

        let mut emitted = 0i64;
        for cluster in clusters {
            if cluster.members.len() < 2 || cluster.coherence < MIN_COHERENCE {
                continue;
            }
            let content = reflective_content(
                &cluster.members.iter().map(|&i| members[i]).collect::<Vec<_>>(),
                &cluster.keywords,
                self.config.summary_max_length,
            );
            let candidate_set: HashSet<String> =
                crate::engine::scoring::tokenize(&content).into_iter().collect();
            if existing_sets
                .iter()
                .any(|set| overlap(&candidate_set, set) >= DUPLICATE_OVERLAP)
            {
                debug!(namespace, "suppressing duplicate reflection");
                continue;
            }

            let receipt = self
                .engine
                .store_memory(crate::memory::StoreInput {
                    content,
                    namespaces: vec![namespace.to_string()],
                    tags: vec!["reflective".to_string()],
                    metadata: Default::default(),
                    lenient: true,
                })
                .await?;

            let now = chrono::Utc::now().timestamp();
            for &i in &cluster.members {
                let waypoint = Waypoint {
                    src_id: members[i].id.clone(),
                    dst_id: receipt.id.clone(),
                    namespace: namespace.to_string(),
                    weight: cluster.coherence.clamp(0.0, 1.0),
                    created_at: now,
                    updated_at: now,
                };
                store.upsert_waypoint(&waypoint).await?;
            }
            emitted += 1;
        }

        if emitted > 0 {
            self.rebuild_user_summary(namespace, store).await?;
        }
        Ok(emitted)
    }

    /// Rebuild the namespace digest from its reflective memories.
    async fn rebuild_user_summary(
        &self,
        namespace: &str,
        store: &Arc<dyn MetadataStore>,
    ) -> crate::engine::Result<()> {
        let reflections = store
            .list_memories(Some(namespace), Some(Sector::Reflective), 0, 16)
            .await?;
        if reflections.is_empty() {
            return Ok(());
        }
        let joined = reflections
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let summary = UserSummary {
            namespace: namespace.to_string(),
            summary: summarize(&joined, self.config.summary_max_length * 2),
            reflection_count: reflections.len() as i64,
            updated_at: chrono::Utc::now().timestamp(),
        };
        store.upsert_user_summary(&summary).await?;
        Ok(())
    }
}

// ============================================================================
// CLUSTERING
// ============================================================================

#[derive(Debug)]
pub(crate) struct Cluster {
    /// Indexes into the input slice
    pub members: Vec<usize>,
    /// Mean pairwise token overlap among members
    pub coherence: f64,
    /// Dominant tokens across the cluster
    pub keywords: Vec<String>,
}

/// Jaccard-style overlap between token sets, in [0, 1].
pub(crate) fn overlap(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count() as f64;
    shared / a.len().min(b.len()) as f64
}

/// Greedy farthest-point clustering on token overlap.
///
/// Seeds are picked to be maximally distant from the seeds chosen so far
/// (up to `max_clusters`); every item then joins its most-overlapping seed.
pub(crate) fn cluster_by_overlap(items: &[HashSet<String>], max_clusters: usize) -> Vec<Cluster> {
    if items.is_empty() || max_clusters == 0 {
        return vec![];
    }

    // Farthest-point seed selection, starting from the largest item
    let mut seeds: Vec<usize> = vec![
        (0..items.len())
            .max_by_key(|&i| items[i].len())
            .unwrap_or(0),
    ];
    while seeds.len() < max_clusters.min(items.len()) {
        let next = (0..items.len())
            .filter(|i| !seeds.contains(i))
            .min_by(|&a, &b| {
                let da: f64 = seeds.iter().map(|&s| overlap(&items[a], &items[s])).sum();
                let db: f64 = seeds.iter().map(|&s| overlap(&items[b], &items[s])).sum();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            });
        match next {
            Some(i) => seeds.push(i),
            None => break,
        }
    }

    // Assignment
    let mut clusters: Vec<Vec<usize>> = vec![vec![]; seeds.len()];
    for i in 0..items.len() {
        let best = seeds
            .iter()
            .enumerate()
            .max_by(|&(_, &a), &(_, &b)| {
                overlap(&items[i], &items[a])
                    .partial_cmp(&overlap(&items[i], &items[b]))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(ci, _)| ci)
            .unwrap_or(0);
        clusters[best].push(i);
    }

    clusters
        .into_iter()
        .filter(|members| !members.is_empty())
        .map(|members| {
            let coherence = mean_pairwise_overlap(&members, items);
            let keywords = dominant_keywords(&members, items, 8);
            Cluster {
                members,
                coherence,
                keywords,
            }
        })
        .collect()
}

fn mean_pairwise_overlap(members: &[usize], items: &[HashSet<String>]) -> f64 {
    if members.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (a, &i) in members.iter().enumerate() {
        for &j in &members[a + 1..] {
            total += overlap(&items[i], &items[j]);
            pairs += 1;
        }
    }
    if pairs == 0 { 0.0 } else { total / pairs as f64 }
}

fn dominant_keywords(members: &[usize], items: &[HashSet<String>], limit: usize) -> Vec<String> {
    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for &i in members {
        for token in &items[i] {
            if token.len() >= 4 {
                *counts.entry(token.as_str()).or_default() += 1;
            }
        }
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(w, _)| w.to_string())
        .collect()
}

/// Compose the derived reflective content for a cluster.
fn reflective_content(members: &[&Memory], keywords: &[String], max_len: usize) -> String {
    let lead = format!(
        "Recurring theme across {} memories: {}.",
        members.len(),
        keywords.join(", ")
    );
    let body = members
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let budget = (max_len * 2).saturating_sub(lead.len() + 1);
    if budget > 16 {
        format!("{} {}", lead, summarize(&body, budget))
    } else {
        lead
    }
}

// ============================================================================
// TESTS
// ============================================================================
