//! Concurrency primitives for the engine
//!
//! Mutations serialize per memory id through a fixed set of sharded locks;
//! namespace initialization runs once per label behind its own shard set
//! plus a concurrent initialized-set that makes the steady-state check
//! lock-free.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use dashmap::DashSet;
use tokio::sync::{Mutex, MutexGuard};

fn shard_of(key: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

// ============================================================================
// ID LOCKS
// ============================================================================

/// Fine-grained mutation locks keyed by `hash(memory_id) % shards`.
pub struct IdLocks {
    shards: Vec<Mutex<()>>,
}

impl IdLocks {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Serialize with every other mutation of the same memory id.
    pub async fn lock(&self, memory_id: &str) -> MutexGuard<'_, ()> {
        self.shards[shard_of(memory_id, self.shards.len())]
            .lock()
            .await
    }
}

// ============================================================================
// NAMESPACE REGISTRY
// ============================================================================

/// Tracks namespaces whose row and collection already exist.
///
/// Single writer during init of a given label, many lock-free readers at
/// steady state.
pub struct NamespaceRegistry {
    initialized: DashSet<String>,
    init_locks: Vec<Mutex<()>>,
}

impl NamespaceRegistry {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            initialized: DashSet::new(),
            init_locks: (0..shards).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Fast path: true when the namespace finished initialization earlier.
    pub fn is_initialized(&self, namespace: &str) -> bool {
        self.initialized.contains(namespace)
    }

    /// Acquire the init lock shard for a namespace. Callers re-check
    /// [`is_initialized`] after acquisition (double-checked init).
    pub async fn init_guard(&self, namespace: &str) -> MutexGuard<'_, ()> {
        self.init_locks[shard_of(namespace, self.init_locks.len())]
            .lock()
            .await
    }

    /// Mark a namespace fully initialized.
    pub fn mark_initialized(&self, namespace: &str) {
        self.initialized.insert(namespace.to_string());
    }
}

// ============================================================================
// TESTS
// ============================================================================
