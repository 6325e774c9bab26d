//! Background worker supervision
//!
//! Owns the shutdown signal and the join handles of every background task
//! (decay pool, regeneration, reflection). Shutdown is orderly: signal,
//! then join within a grace period, then abort stragglers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::HsgEngine;
use crate::config::Config;
use crate::reflect::ReflectionJob;
use crate::salience::DecayWorkerPool;

/// Supervises the engine's background maintenance tasks.
pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Spawn the configured maintenance workers for an engine.
    pub fn start(engine: Arc<HsgEngine>, config: Arc<Config>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        handles.extend(
            DecayWorkerPool::new(Arc::clone(&engine), Arc::clone(&config))
                .spawn(shutdown_rx.clone()),
        );

        if config.auto_reflect {
            handles.push(ReflectionJob::new(engine, config).spawn(shutdown_rx));
        }

        info!(workers = handles.len(), "background workers started");
        Self {
            shutdown_tx,
            handles,
        }
    }

    /// A supervisor with no workers (tests, embedded use).
    pub fn idle() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: vec![],
        }
    }

    /// Signal workers and join them within the grace period.
    pub async fn shutdown(mut self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        let deadline = tokio::time::Instant::now() + grace;
        for handle in self.handles.drain(..) {
            let abort = handle.abort_handle();
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                warn!("background worker did not stop within grace period, aborting");
                abort.abort();
            }
        }
        info!("background workers stopped");
    }
}

// ============================================================================
// TESTS
// ============================================================================
