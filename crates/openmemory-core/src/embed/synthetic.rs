//! Deterministic synthetic embeddings
//!
//! Hash-based pseudo-random unit vectors. The same (text, sector, dimension)
//! always produces the same vector, so retries are idempotent and tests are
//! reproducible without any provider. Lexically similar texts do NOT land
//! near each other - synthetic vectors only guarantee exact-text identity,
//! which is what the fallback and the test suite need.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{normalize, EmbedError, Embedder, Result};
use crate::memory::Sector;

/// Deterministic unit-vector embedder; also the engine-wide fallback.
#[derive(Debug, Clone)]
pub struct SyntheticEmbedder {
    dimensions: usize,
}

impl SyntheticEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Expand a seed digest into `dimensions` floats in [-1, 1] by hashing
    /// seed || counter blocks.
    fn expand(&self, seed: &[u8; 32]) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dimensions);
        let mut counter: u32 = 0;
        'outer: loop {
            let mut hasher = Sha256::new();
            hasher.update(seed);
            hasher.update(counter.to_le_bytes());
            let block = hasher.finalize();
            for chunk in block.chunks_exact(4) {
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                // Map to [-1, 1)
                let unit = (raw as f64 / u32::MAX as f64) * 2.0 - 1.0;
                vector.push(unit as f32);
                if vector.len() == self.dimensions {
                    break 'outer;
                }
            }
            counter += 1;
        }
        vector
    }
}

#[async_trait]
impl Embedder for SyntheticEmbedder {
    fn provider_name(&self) -> &'static str {
        "synthetic"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str, sector: Option<Sector>) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(EmbedError::InvalidInput("text cannot be empty".to_string()));
        }
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        if let Some(sector) = sector {
            hasher.update(sector.as_str().as_bytes());
        }
        let seed: [u8; 32] = hasher.finalize().into();

        let mut vector = self.expand(&seed);
        normalize(&mut vector);
        Ok(vector)
    }
}

// ============================================================================
// TESTS
// ============================================================================
