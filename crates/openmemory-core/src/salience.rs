//! Salience lifecycle - decay, reinforcement, fingerprinting, regeneration
//!
//! Stored salience is only rematerialized by the background sweep; every read
//! computes the decayed value on the fly with [`decayed`]. The worker pool
//! walks namespaces round-robin, fingerprints memories whose decayed salience
//! falls below the cold threshold, and (when enabled) re-embeds memories that
//! were stored with a synthetic fallback vector.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::HsgEngine;
use crate::store::MetadataStore;
use crate::summarize::summarize;

/// Default salience bump applied to query hits.
pub const DEFAULT_BOOST: f64 = 0.1;

const SECONDS_PER_DAY: f64 = 86_400.0;

// ============================================================================
// DECAY MATH
// ============================================================================

/// Salience decayed from `last_seen_at` to `now`.
///
/// `salience_now = salience * exp(-lambda * age_days)`, clamped to [0, 1].
/// A `now` earlier than `last_seen_at` is treated as zero elapsed time so the
/// value can never rise without a reinforcement.
pub fn decayed(salience: f64, lambda: f64, last_seen_at: i64, now: i64) -> f64 {
    let age_days = (now - last_seen_at).max(0) as f64 / SECONDS_PER_DAY;
    (salience * (-lambda * age_days).exp()).clamp(0.0, 1.0)
}

/// Reinforced salience: `min(1, salience + boost)`. Never decreases.
pub fn reinforced(salience: f64, boost: f64) -> f64 {
    (salience + boost.max(0.0)).clamp(0.0, 1.0)
}

/// Recency factor used by the hybrid score: `exp(-lambda_rec * age_days)`.
pub fn recency(created_at: i64, now: i64, lambda_rec: f64) -> f64 {
    let age_days = (now - created_at).max(0) as f64 / SECONDS_PER_DAY;
    (-lambda_rec * age_days).exp()
}

// ============================================================================
// DECAY WORKER POOL
// ============================================================================

/// Background pool that sweeps cold memories.
///
/// `decay_threads` workers share the namespace list round-robin: worker `w`
/// handles namespaces where `index % threads == w`. Each iteration is a
/// cooperative checkpoint; shutdown is observed between pages.
pub struct DecayWorkerPool {
    engine: Arc<HsgEngine>,
    config: Arc<Config>,
}

impl DecayWorkerPool {
    pub fn new(engine: Arc<HsgEngine>, config: Arc<Config>) -> Self {
        Self { engine, config }
    }

    /// Spawn the pool; returns one join handle per worker.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        let threads = self.config.decay_threads.max(1);
        let mut handles = Vec::with_capacity(threads);
        let engine = self.engine;
        let config = self.config;

        for worker in 0..threads {
            let engine = Arc::clone(&engine);
            let config = Arc::clone(&config);
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut tick =
                    tokio::time::interval(std::time::Duration::from_secs(config.decay_interval_secs));
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = tick.tick() => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                debug!(worker, "decay worker stopping");
                                return;
                            }
                        }
                    }
                    if let Err(e) = run_sweep(&engine, &config, worker, threads).await {
                        warn!(worker, "decay sweep failed: {}", e);
                    }
                }
            }));
        }

        // Regeneration shares the pool's cadence but runs as its own task
        if config.regeneration_enabled {
            let engine = Arc::clone(&engine);
            let config_clone = Arc::clone(&config);
            handles.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(std::time::Duration::from_secs(
                    config_clone.decay_interval_secs,
                ));
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = tick.tick() => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                return;
                            }
                        }
                    }
                    if let Err(e) = run_regeneration(&engine, &config_clone).await {
                        warn!("regeneration pass failed: {}", e);
                    }
                }
            }));
        }

        handles
    }
}

/// One cold-memory sweep over this worker's share of the namespaces.
async fn run_sweep(
    engine: &Arc<HsgEngine>,
    config: &Arc<Config>,
    worker: usize,
    threads: usize,
) -> crate::engine::Result<()> {
    let namespaces = engine.store().list_namespace_labels().await?;
    let now = chrono::Utc::now().timestamp();
    let mut fingerprinted = 0i64;

    for (i, namespace) in namespaces.iter().enumerate() {
        if i % threads != worker {
            continue;
        }
        let mut offset = 0i64;
        loop {
            let page = engine
                .store()
                .list_memories(Some(namespace.as_str()), None, offset, config.seg_size as i64)
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as i64;

            for memory in page {
                if memory.fingerprinted {
                    continue;
                }
                let now_salience = decayed(
                    memory.salience,
                    memory.decay_lambda,
                    memory.last_seen_at,
                    now,
                );
                if now_salience >= config.cold_threshold {
                    continue;
                }
                if let Err(e) = engine.fingerprint(&memory.id).await {
                    warn!(id = %memory.id, "fingerprint failed: {}", e);
                    continue;
                }
                fingerprinted += 1;
            }
        }
    }

    if fingerprinted > 0 {
        engine
            .store()
            .append_stat("fingerprinted", fingerprinted)
            .await?;
        info!(worker, fingerprinted, "cold-memory sweep complete");
    }
    Ok(())
}

/// Re-embed memories that were stored with a synthetic fallback vector or
/// whose fingerprinted summary was hit by a query.
async fn run_regeneration(engine: &Arc<HsgEngine>, config: &Arc<Config>) -> crate::engine::Result<()> {
    let pending = engine
        .store()
        .memories_needing_reembed(config.seg_size as i64)
        .await?;
    if pending.is_empty() {
        return Ok(());
    }
    let mut regenerated = 0i64;
    for memory in pending {
        match engine.regenerate(&memory).await {
            Ok(true) => regenerated += 1,
            Ok(false) => {}
            Err(e) => warn!(id = %memory.id, "regeneration failed: {}", e),
        }
    }
    if regenerated > 0 {
        engine.store().append_stat("regenerated", regenerated).await?;
        info!(regenerated, "regeneration pass complete");
    }
    Ok(())
}

// ============================================================================
// FINGERPRINT HELPERS
// ============================================================================

/// Build the fingerprint replacement content for a cold memory.
/// Falls back to a truncation when the memory never had a summary.
pub fn fingerprint_content(content: &str, summary: Option<&str>, max_len: usize) -> String {
    match summary {
        Some(s) if !s.is_empty() => s.chars().take(max_len).collect(),
        _ => summarize(content, max_len),
    }
}

// ============================================================================
// TESTS
// ============================================================================
