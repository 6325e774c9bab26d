//! HTTP embedding providers
//!
//! Thin reqwest clients for OpenAI-, Gemini-, and Ollama-style embedding
//! APIs. Each provider validates the returned dimension and normalizes the
//! vector before handing it to the engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{normalize, EmbedError, Embedder, Result};
use crate::memory::Sector;

/// Texts longer than this are truncated before the provider call.
const MAX_TEXT_LENGTH: usize = 8192;

fn clip(text: &str) -> &str {
    match text.char_indices().nth(MAX_TEXT_LENGTH) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn check_dimensions(vector: Vec<f32>, expected: usize) -> Result<Vec<f32>> {
    if vector.len() != expected {
        return Err(EmbedError::DimensionMismatch {
            expected,
            got: vector.len(),
        });
    }
    let mut vector = vector;
    normalize(&mut vector);
    Ok(vector)
}

// ============================================================================
// OPENAI
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

/// OpenAI `/v1/embeddings` client.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(url: Option<String>, api_key: String, model: Option<String>, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.unwrap_or_else(|| "https://api.openai.com/v1/embeddings".to_string()),
            api_key,
            model: model.unwrap_or_else(|| "text-embedding-3-small".to_string()),
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str, _sector: Option<Sector>) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(EmbedError::InvalidInput("text cannot be empty".to_string()));
        }
        let body = OpenAiEmbedRequest {
            model: &self.model,
            input: clip(text),
            dimensions: self.dimensions,
        };
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Provider(e.to_string()))?
            .error_for_status()
            .map_err(|e| EmbedError::Provider(e.to_string()))?
            .json::<OpenAiEmbedResponse>()
            .await
            .map_err(|e| EmbedError::Provider(e.to_string()))?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Provider("no embedding in response".to_string()))?;
        check_dimensions(embedding.embedding, self.dimensions)
    }
}

// ============================================================================
// GEMINI
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiEmbedRequest<'a> {
    content: GeminiContent<'a>,
    output_dimensionality: usize,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedResponse {
    embedding: GeminiEmbedding,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

/// Gemini `embedContent` client.
pub struct GeminiEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    dimensions: usize,
}

impl GeminiEmbedder {
    pub fn new(url: Option<String>, api_key: String, model: Option<String>, dimensions: usize) -> Self {
        let model = model.unwrap_or_else(|| "text-embedding-004".to_string());
        Self {
            client: reqwest::Client::new(),
            url: url.unwrap_or_else(|| {
                format!(
                    "https://generativelanguage.googleapis.com/v1beta/models/{}:embedContent",
                    model
                )
            }),
            api_key,
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn provider_name(&self) -> &'static str {
        "gemini"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str, _sector: Option<Sector>) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(EmbedError::InvalidInput("text cannot be empty".to_string()));
        }
        let body = GeminiEmbedRequest {
            content: GeminiContent {
                parts: vec![GeminiPart { text: clip(text) }],
            },
            output_dimensionality: self.dimensions,
        };
        let response = self
            .client
            .post(&self.url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Provider(e.to_string()))?
            .error_for_status()
            .map_err(|e| EmbedError::Provider(e.to_string()))?
            .json::<GeminiEmbedResponse>()
            .await
            .map_err(|e| EmbedError::Provider(e.to_string()))?;

        check_dimensions(response.embedding.values, self.dimensions)
    }
}

// ============================================================================
// OLLAMA
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama `/api/embed` client for local models.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    pub fn new(url: Option<String>, model: Option<String>, dimensions: usize) -> Self {
        let endpoint = url.unwrap_or_else(|| "http://localhost:11434".to_string());
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/api/embed", endpoint.trim_end_matches('/')),
            model: model.unwrap_or_else(|| "nomic-embed-text".to_string()),
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str, _sector: Option<Sector>) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(EmbedError::InvalidInput("text cannot be empty".to_string()));
        }
        let body = OllamaEmbedRequest {
            model: &self.model,
            input: clip(text),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Provider(e.to_string()))?
            .error_for_status()
            .map_err(|e| EmbedError::Provider(e.to_string()))?
            .json::<OllamaEmbedResponse>()
            .await
            .map_err(|e| EmbedError::Provider(e.to_string()))?;

        let embedding = response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Provider("no embedding in response".to_string()))?;
        check_dimensions(embedding, self.dimensions)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_respects_char_boundaries() {
        let text = "é".repeat(MAX_TEXT_LENGTH + 10);
        let clipped = clip(&text);
        assert_eq!(clipped.chars().count(), MAX_TEXT_LENGTH);
    }

    #[test]
    fn test_check_dimensions_rejects_mismatch() {
        let result = check_dimensions(vec![1.0, 2.0], 3);
        assert!(matches!(
            result,
            Err(EmbedError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_check_dimensions_normalizes() {
        let v = check_dimensions(vec![3.0, 4.0], 2).unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_ollama_url_building() {
        let e = OllamaEmbedder::new(Some("http://host:1234/".to_string()), None, 8);
        assert_eq!(e.url, "http://host:1234/api/embed");
    }
}
