//! Embedding layer
//!
//! The engine consumes a pluggable [`Embedder`] that maps text to a unit
//! vector of the configured dimension. Providers are thin HTTP clients;
//! the deterministic synthetic embedder doubles as the fallback that keeps
//! the write path alive when a provider is down.

mod providers;
mod synthetic;

pub use providers::{GeminiEmbedder, OllamaEmbedder, OpenAiEmbedder};
pub use synthetic::SyntheticEmbedder;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::warn;

use crate::config::{Config, EmbedMode, EmbeddingProviderKind};
use crate::memory::Sector;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbedError {
    /// Provider transport or API failure
    #[error("embedding provider failed: {0}")]
    Provider(String),
    /// Provider returned a vector of the wrong dimension
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// Invalid input (empty text, oversized, etc.)
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, EmbedError>;

// ============================================================================
// EMBEDDER TRAIT
// ============================================================================

/// Maps text to a unit vector of a fixed dimension.
///
/// Implementations may specialize per sector (advanced mode passes the
/// sector so a provider can prefix-condition the text); the synthetic
/// embedder mixes the sector into its seed.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Provider label used in logs and stats rows.
    fn provider_name(&self) -> &'static str;

    /// Output dimension; every vector in the process shares it.
    fn dimensions(&self) -> usize;

    /// Embed one text. The returned vector is L2-normalized.
    async fn embed(&self, text: &str, sector: Option<Sector>) -> Result<Vec<f32>>;
}

// ============================================================================
// VECTOR MATH
// ============================================================================

/// L2-normalize in place. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity between two vectors. Mismatched lengths score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 { dot / denom } else { 0.0 }
}

/// Mean of same-length vectors, L2-normalized. Vectors whose length differs
/// from the first are skipped; an empty input yields an empty vector.
pub fn centroid(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return vec![];
    };
    let mut acc = vec![0.0_f32; first.len()];
    let mut count = 0usize;
    for v in vectors {
        if v.len() != acc.len() {
            continue;
        }
        for (a, x) in acc.iter_mut().zip(v) {
            *a += x;
        }
        count += 1;
    }
    if count == 0 {
        return vec![];
    }
    for a in &mut acc {
        *a /= count as f32;
    }
    normalize(&mut acc);
    acc
}

/// Serialize a vector to little-endian bytes for blob storage.
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a little-endian blob back into a vector.
pub fn vector_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

// ============================================================================
// EMBEDDER HANDLE
// ============================================================================

/// The outcome of an embedding request, noting whether the synthetic
/// fallback had to stand in for the configured provider.
#[derive(Debug, Clone)]
pub struct EmbedOutcome {
    pub vector: Vec<f32>,
    pub fallback: bool,
}

/// Wraps the configured provider with retry-once semantics and the
/// synthetic fallback. The write path never stalls on a provider fault;
/// fall-through is counted so stats can expose it.
pub struct EmbedderHandle {
    provider: Arc<dyn Embedder>,
    fallback: SyntheticEmbedder,
    mode: EmbedMode,
    delay_ms: u64,
    parallel: bool,
    fallback_count: AtomicU64,
}

impl EmbedderHandle {
    pub fn new(provider: Arc<dyn Embedder>, config: &Config) -> Self {
        Self {
            provider,
            fallback: SyntheticEmbedder::new(config.vec_dim),
            mode: config.embed_mode,
            delay_ms: config.embed_delay_ms,
            parallel: config.embed_parallel,
            fallback_count: AtomicU64::new(0),
        }
    }

    /// Build the handle from configuration, selecting the provider.
    pub fn from_config(config: &Config) -> Self {
        let provider: Arc<dyn Embedder> = match config.embeddings {
            EmbeddingProviderKind::Synthetic => Arc::new(SyntheticEmbedder::new(config.vec_dim)),
            EmbeddingProviderKind::OpenAi => Arc::new(OpenAiEmbedder::new(
                config.embed_url.clone(),
                config.embed_api_key.clone().unwrap_or_default(),
                config.embed_model.clone(),
                config.vec_dim,
            )),
            EmbeddingProviderKind::Gemini => Arc::new(GeminiEmbedder::new(
                config.embed_url.clone(),
                config.embed_api_key.clone().unwrap_or_default(),
                config.embed_model.clone(),
                config.vec_dim,
            )),
            EmbeddingProviderKind::Ollama => Arc::new(OllamaEmbedder::new(
                config.embed_url.clone(),
                config.embed_model.clone(),
                config.vec_dim,
            )),
        };
        Self::new(provider, config)
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    /// Total synthetic fall-throughs since startup.
    pub fn fallback_count(&self) -> u64 {
        self.fallback_count.load(Ordering::Relaxed)
    }

    /// Embed for the write path: falls back to a synthetic vector on
    /// persistent provider failure instead of failing the write.
    pub async fn embed_for_write(&self, text: &str, sector: Option<Sector>) -> Result<EmbedOutcome> {
        match self.try_provider(text, sector).await {
            Ok(vector) => Ok(EmbedOutcome { vector, fallback: false }),
            Err(e) => {
                warn!(
                    provider = self.provider.provider_name(),
                    "embedding failed, using synthetic fallback: {}", e
                );
                self.fallback_count.fetch_add(1, Ordering::Relaxed);
                let vector = self.fallback.embed(text, sector).await?;
                Ok(EmbedOutcome { vector, fallback: true })
            }
        }
    }

    /// Embed for the read path: queries fail when the provider does
    /// (unless the provider IS the synthetic embedder).
    pub async fn embed_for_query(&self, text: &str) -> Result<Vec<f32>> {
        self.try_provider(text, None).await
    }

    /// Embed the content for every active sector.
    ///
    /// Simple mode issues exactly one call and reuses the vector across
    /// sectors. Advanced mode embeds per sector, serially with an inter-call
    /// delay by default, or concurrently when `embed_parallel` is set.
    pub async fn embed_sectors(
        &self,
        text: &str,
        sectors: &[Sector],
    ) -> Result<Vec<(Sector, EmbedOutcome)>> {
        match self.mode {
            EmbedMode::Simple => {
                let outcome = self.embed_for_write(text, None).await?;
                Ok(sectors.iter().map(|s| (*s, outcome.clone())).collect())
            }
            EmbedMode::Advanced if self.parallel => {
                let futures: Vec<_> = sectors
                    .iter()
                    .map(|s| async move { Ok::<_, EmbedError>((*s, self.embed_for_write(text, Some(*s)).await?)) })
                    .collect();
                let mut out = Vec::with_capacity(sectors.len());
                for result in futures::future::join_all(futures).await {
                    out.push(result?);
                }
                Ok(out)
            }
            EmbedMode::Advanced => {
                let mut out = Vec::with_capacity(sectors.len());
                for (i, sector) in sectors.iter().enumerate() {
                    if i > 0 && self.delay_ms > 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
                    }
                    out.push((*sector, self.embed_for_write(text, Some(*sector)).await?));
                }
                Ok(out)
            }
        }
    }

    /// One retry, then surface the error.
    async fn try_provider(&self, text: &str, sector: Option<Sector>) -> Result<Vec<f32>> {
        match self.provider.embed(text, sector).await {
            Ok(v) => Ok(v),
            Err(EmbedError::InvalidInput(e)) => Err(EmbedError::InvalidInput(e)),
            Err(first) => {
                warn!(
                    provider = self.provider.provider_name(),
                    "embed attempt failed, retrying once: {}", first
                );
                self.provider.embed(text, sector).await
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn provider_name(&self) -> &'static str {
            "failing"
        }
        fn dimensions(&self) -> usize {
            32
        }
        async fn embed(&self, _text: &str, _sector: Option<Sector>) -> Result<Vec<f32>> {
            Err(EmbedError::Provider("down".to_string()))
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.vec_dim = 32;
        config
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_centroid_averages_and_normalizes() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let c = centroid(&vectors);
        assert_eq!(c.len(), 2);
        assert!((c[0] - c[1]).abs() < 1e-6);
        let norm: f32 = c.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_centroid_skips_mismatched_and_handles_empty() {
        let vectors = vec![vec![1.0, 0.0], vec![9.9]];
        let c = centroid(&vectors);
        assert_eq!(c, vec![1.0, 0.0]);
        assert!(centroid(&[]).is_empty());
    }

    #[test]
    fn test_vector_bytes_roundtrip() {
        let v = vec![0.25_f32, -1.5, 3.75];
        let restored = vector_from_bytes(&vector_to_bytes(&v)).unwrap();
        assert_eq!(v, restored);
        assert!(vector_from_bytes(&[1, 2, 3]).is_none());
    }

    #[tokio::test]
    async fn test_write_falls_back_to_synthetic() {
        let handle = EmbedderHandle::new(Arc::new(FailingEmbedder), &test_config());
        let outcome = handle.embed_for_write("hello", None).await.unwrap();
        assert!(outcome.fallback);
        assert_eq!(outcome.vector.len(), 32);
        assert_eq!(handle.fallback_count(), 1);
    }

    #[tokio::test]
    async fn test_query_propagates_provider_failure() {
        let handle = EmbedderHandle::new(Arc::new(FailingEmbedder), &test_config());
        assert!(handle.embed_for_query("hello").await.is_err());
    }

    #[tokio::test]
    async fn test_simple_mode_reuses_one_vector() {
        let config = test_config();
        let handle = EmbedderHandle::from_config(&config);
        let sectors = [Sector::Semantic, Sector::Episodic];
        let out = handle.embed_sectors("same text", &sectors).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].1.vector, out[1].1.vector);
    }
}
