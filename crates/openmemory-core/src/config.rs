//! Process-wide configuration
//!
//! Loaded once at startup from an optional JSON file plus `OPENMEMORY_*`
//! environment overrides, then frozen behind an `Arc`. Tier presets fill the
//! dimension/concurrency/cache defaults so a bare config still serves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ENUMS
// ============================================================================

/// Preset bundle of dimension / concurrency / cache defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Keyword-only scoring, smallest footprint
    Hybrid,
    Fast,
    #[default]
    Smart,
    Deep,
}

impl Tier {
    pub fn default_vec_dim(&self) -> usize {
        match self {
            Tier::Hybrid => 256,
            Tier::Fast => 384,
            Tier::Smart => 768,
            Tier::Deep => 1536,
        }
    }

    pub fn default_cache_segments(&self) -> usize {
        match self {
            Tier::Hybrid | Tier::Fast => 2,
            Tier::Smart => 3,
            Tier::Deep => 4,
        }
    }

    pub fn default_max_active(&self) -> usize {
        match self {
            Tier::Hybrid | Tier::Fast => 32,
            Tier::Smart => 64,
            Tier::Deep => 128,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    #[default]
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Inproc,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    OpenAi,
    Gemini,
    Ollama,
    #[default]
    Synthetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedMode {
    #[default]
    Simple,
    Advanced,
}

// ============================================================================
// SCORE WEIGHTS
// ============================================================================

/// Hybrid-score weights. Defaults bias toward vector similarity and
/// salience; the hybrid tier collapses to keyword-only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScoreWeights {
    pub w_vec: f64,
    pub w_kw: f64,
    pub w_bm25: f64,
    pub w_sal: f64,
    pub w_rec: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            w_vec: 0.40,
            w_kw: 0.15,
            w_bm25: 0.10,
            w_sal: 0.25,
            w_rec: 0.10,
        }
    }
}

impl ScoreWeights {
    /// Keyword-only weights used by the hybrid tier.
    pub fn keyword_only() -> Self {
        Self {
            w_vec: 0.0,
            w_kw: 1.0,
            w_bm25: 0.0,
            w_sal: 0.0,
            w_rec: 0.0,
        }
    }

    pub fn sum(&self) -> f64 {
        self.w_vec + self.w_kw + self.w_bm25 + self.w_sal + self.w_rec
    }
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Full configuration surface. Immutable after init.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    // Serving
    pub port: u16,
    pub request_timeout_secs: u64,

    // Metadata store
    pub metadata_backend: MetadataBackend,
    pub db_path: Option<PathBuf>,
    pub postgres_dsn: Option<String>,

    // Vector store
    pub vector_backend: VectorBackend,
    pub qdrant_url: Option<String>,
    pub qdrant_api_key: Option<String>,
    pub collection_prefix: String,

    // Embeddings
    pub embeddings: EmbeddingProviderKind,
    pub embed_api_key: Option<String>,
    pub embed_url: Option<String>,
    pub embed_model: Option<String>,
    /// 0 means "use the tier default"
    pub vec_dim: usize,
    pub max_vector_dim: usize,
    pub min_vector_dim: usize,
    pub embed_mode: EmbedMode,
    pub embed_delay_ms: u64,
    pub embed_parallel: bool,

    // Tier presets
    pub tier: Tier,
    pub cache_segments: usize,
    pub max_active: usize,
    pub seg_size: usize,

    // Retrieval
    pub min_score: f64,
    pub keyword_boost: f64,
    pub keyword_min_length: usize,
    pub weights: ScoreWeights,
    pub expand_threshold: f64,
    pub edge_weight: f64,
    pub recency_lambda: f64,

    // Salience lifecycle
    pub decay_threads: usize,
    pub decay_interval_secs: u64,
    pub cold_threshold: f64,
    pub reinforce_on_query: bool,
    pub regeneration_enabled: bool,
    pub salience_boost: f64,

    // Summaries / compression
    pub use_summary_only: bool,
    pub summary_max_length: usize,
    /// How many summary tiers fingerprinting keeps (1 = summary only)
    pub summary_layers: usize,
    pub compression_enabled: bool,
    pub compression_min_length: usize,

    // Reflection
    pub auto_reflect: bool,
    pub reflect_interval_mins: u64,
    pub reflect_min_memories: usize,
    pub max_clusters: usize,

    // Concurrency
    pub lock_shards: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            request_timeout_secs: 30,

            metadata_backend: MetadataBackend::Sqlite,
            db_path: None,
            postgres_dsn: None,

            vector_backend: VectorBackend::Inproc,
            qdrant_url: None,
            qdrant_api_key: None,
            collection_prefix: "openmemory_vectors_".to_string(),

            embeddings: EmbeddingProviderKind::Synthetic,
            embed_api_key: None,
            embed_url: None,
            embed_model: None,
            vec_dim: 0,
            max_vector_dim: 4096,
            min_vector_dim: 8,
            embed_mode: EmbedMode::Simple,
            embed_delay_ms: 50,
            embed_parallel: false,

            tier: Tier::Smart,
            cache_segments: 0,
            max_active: 0,
            seg_size: 256,

            min_score: 0.0,
            keyword_boost: 0.2,
            keyword_min_length: 3,
            weights: ScoreWeights::default(),
            expand_threshold: 0.6,
            edge_weight: 0.5,
            recency_lambda: 0.05,

            decay_threads: 2,
            decay_interval_secs: 300,
            cold_threshold: 0.05,
            reinforce_on_query: true,
            regeneration_enabled: true,
            salience_boost: 0.1,

            use_summary_only: false,
            summary_max_length: 240,
            summary_layers: 1,
            compression_enabled: false,
            compression_min_length: 512,

            auto_reflect: true,
            reflect_interval_mins: 60,
            reflect_min_memories: 8,
            max_clusters: 8,

            lock_shards: 64,
        }
    }
}

impl Config {
    /// Load from an optional JSON file, overlay environment variables, apply
    /// tier defaults, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| ConfigError::Io(p.to_path_buf(), e))?;
                serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(p.to_path_buf(), e))?
            }
            None => Config::default(),
        };
        config.apply_env(&env_map());
        config.resolve_tier();
        config.validate()?;
        Ok(config)
    }

    /// Fill zero-valued knobs from the tier preset; the hybrid tier also
    /// collapses the score weights to keyword-only.
    pub fn resolve_tier(&mut self) {
        if self.vec_dim == 0 {
            self.vec_dim = self.tier.default_vec_dim();
        }
        if self.cache_segments == 0 {
            self.cache_segments = self.tier.default_cache_segments();
        }
        if self.max_active == 0 {
            self.max_active = self.tier.default_max_active();
        }
        if self.tier == Tier::Hybrid {
            self.weights = ScoreWeights::keyword_only();
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.vec_dim < self.min_vector_dim || self.vec_dim > self.max_vector_dim {
            return Err(ConfigError::Invalid(format!(
                "vec_dim {} outside [{}, {}]",
                self.vec_dim, self.min_vector_dim, self.max_vector_dim
            )));
        }
        if self.metadata_backend == MetadataBackend::Postgres && self.postgres_dsn.is_none() {
            return Err(ConfigError::Invalid(
                "metadata_backend=postgres requires postgres_dsn".to_string(),
            ));
        }
        if self.vector_backend == VectorBackend::External && self.qdrant_url.is_none() {
            return Err(ConfigError::Invalid(
                "vector_backend=external requires qdrant_url".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cold_threshold) {
            return Err(ConfigError::Invalid(
                "cold_threshold must be in [0, 1]".to_string(),
            ));
        }
        let weight_sum = self.weights.sum();
        if !(0.99..=1.01).contains(&weight_sum) {
            return Err(ConfigError::Invalid(format!(
                "score weights must sum to 1.0, got {:.3}",
                weight_sum
            )));
        }
        Ok(())
    }

    /// Default database path under the platform data directory.
    pub fn resolved_db_path(&self) -> PathBuf {
        if let Some(p) = &self.db_path {
            return p.clone();
        }
        if let Some(dirs) = directories::ProjectDirs::from("dev", "openmemory", "openmemory") {
            return dirs.data_dir().join("openmemory.db");
        }
        PathBuf::from("openmemory.db")
    }

    /// Overlay `OPENMEMORY_*` environment variables onto the config.
    fn apply_env(&mut self, env: &HashMap<String, String>) {
        fn parse<T: std::str::FromStr>(env: &HashMap<String, String>, key: &str) -> Option<T> {
            env.get(key).and_then(|v| v.parse().ok())
        }

        if let Some(v) = parse(env, "OPENMEMORY_PORT") {
            self.port = v;
        }
        if let Some(v) = env.get("OPENMEMORY_METADATA_BACKEND") {
            match v.to_lowercase().as_str() {
                "sqlite" => self.metadata_backend = MetadataBackend::Sqlite,
                "postgres" => self.metadata_backend = MetadataBackend::Postgres,
                _ => {}
            }
        }
        if let Some(v) = env.get("OPENMEMORY_DB_PATH") {
            self.db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env.get("OPENMEMORY_POSTGRES_DSN") {
            self.postgres_dsn = Some(v.clone());
        }
        if let Some(v) = env.get("OPENMEMORY_VECTOR_BACKEND") {
            match v.to_lowercase().as_str() {
                "inproc" => self.vector_backend = VectorBackend::Inproc,
                "external" => self.vector_backend = VectorBackend::External,
                _ => {}
            }
        }
        if let Some(v) = env.get("OPENMEMORY_QDRANT_URL") {
            self.qdrant_url = Some(v.clone());
        }
        if let Some(v) = env.get("OPENMEMORY_QDRANT_API_KEY") {
            self.qdrant_api_key = Some(v.clone());
        }
        if let Some(v) = env.get("OPENMEMORY_EMBEDDINGS") {
            match v.to_lowercase().as_str() {
                "openai" => self.embeddings = EmbeddingProviderKind::OpenAi,
                "gemini" => self.embeddings = EmbeddingProviderKind::Gemini,
                "ollama" => self.embeddings = EmbeddingProviderKind::Ollama,
                "synthetic" | "local" => self.embeddings = EmbeddingProviderKind::Synthetic,
                _ => {}
            }
        }
        if let Some(v) = env.get("OPENMEMORY_EMBED_API_KEY") {
            self.embed_api_key = Some(v.clone());
        }
        if let Some(v) = env.get("OPENMEMORY_EMBED_URL") {
            self.embed_url = Some(v.clone());
        }
        if let Some(v) = env.get("OPENMEMORY_EMBED_MODEL") {
            self.embed_model = Some(v.clone());
        }
        if let Some(v) = parse(env, "OPENMEMORY_VEC_DIM") {
            self.vec_dim = v;
        }
        if let Some(v) = env.get("OPENMEMORY_EMBED_MODE") {
            match v.to_lowercase().as_str() {
                "simple" => self.embed_mode = EmbedMode::Simple,
                "advanced" => self.embed_mode = EmbedMode::Advanced,
                _ => {}
            }
        }
        if let Some(v) = env.get("OPENMEMORY_TIER") {
            match v.to_lowercase().as_str() {
                "hybrid" => self.tier = Tier::Hybrid,
                "fast" => self.tier = Tier::Fast,
                "smart" => self.tier = Tier::Smart,
                "deep" => self.tier = Tier::Deep,
                _ => {}
            }
        }
        if let Some(v) = parse(env, "OPENMEMORY_MAX_ACTIVE") {
            self.max_active = v;
        }
        if let Some(v) = parse(env, "OPENMEMORY_DECAY_THREADS") {
            self.decay_threads = v;
        }
        if let Some(v) = parse(env, "OPENMEMORY_COLD_THRESHOLD") {
            self.cold_threshold = v;
        }
        if let Some(v) = parse(env, "OPENMEMORY_REINFORCE_ON_QUERY") {
            self.reinforce_on_query = v;
        }
        if let Some(v) = parse(env, "OPENMEMORY_USE_SUMMARY_ONLY") {
            self.use_summary_only = v;
        }
        if let Some(v) = parse(env, "OPENMEMORY_AUTO_REFLECT") {
            self.auto_reflect = v;
        }
        if let Some(v) = parse(env, "OPENMEMORY_REFLECT_INTERVAL") {
            self.reflect_interval_mins = v;
        }
    }
}

fn env_map() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("OPENMEMORY_"))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_defaults_fill_zeroes() {
        let mut config = Config {
            tier: Tier::Deep,
            ..Config::default()
        };
        config.resolve_tier();
        assert_eq!(config.vec_dim, 1536);
        assert_eq!(config.max_active, 128);
        assert_eq!(config.cache_segments, 4);
    }

    #[test]
    fn test_explicit_values_survive_tier_resolution() {
        let mut config = Config {
            vec_dim: 64,
            max_active: 7,
            ..Config::default()
        };
        config.resolve_tier();
        assert_eq!(config.vec_dim, 64);
        assert_eq!(config.max_active, 7);
    }

    #[test]
    fn test_hybrid_tier_is_keyword_only() {
        let mut config = Config {
            tier: Tier::Hybrid,
            ..Config::default()
        };
        config.resolve_tier();
        assert_eq!(config.weights.w_vec, 0.0);
        assert_eq!(config.weights.w_kw, 1.0);
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let mut config = Config::default();
        config.resolve_tier();
        config.weights.w_vec = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_dsn_for_postgres() {
        let mut config = Config {
            metadata_backend: MetadataBackend::Postgres,
            ..Config::default()
        };
        config.resolve_tier();
        assert!(config.validate().is_err());
        config.postgres_dsn = Some("postgres://localhost/mem".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overlay() {
        let mut config = Config::default();
        let mut env = HashMap::new();
        env.insert("OPENMEMORY_PORT".to_string(), "9999".to_string());
        env.insert("OPENMEMORY_TIER".to_string(), "fast".to_string());
        env.insert("OPENMEMORY_EMBEDDINGS".to_string(), "ollama".to_string());
        config.apply_env(&env);
        assert_eq!(config.port, 9999);
        assert_eq!(config.tier, Tier::Fast);
        assert_eq!(config.embeddings, EmbeddingProviderKind::Ollama);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let mut config = Config::default();
        config.resolve_tier();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.port, config.port);
        assert_eq!(parsed.vec_dim, config.vec_dim);
    }
}
