//! External vector store (Qdrant)
//!
//! Collection-per-namespace over Qdrant's REST API. HNSW m=16,
//! ef_construct=100, cosine distance, payload indexes on `sector` and
//! `memory_id`. Point ids are derived deterministically from
//! `memory_id:sector` so upserts are idempotent on retry.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashSet;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{
    sanitize_namespace, Result, VectorHit, VectorPoint, VectorStore, VectorStoreError,
    VectorStoreStats,
};
use crate::memory::Sector;

/// Deterministic UUID for a (memory, sector) point.
fn point_id(memory_id: &str, sector: Sector) -> String {
    let mut hasher = Sha256::new();
    hasher.update(memory_id.as_bytes());
    hasher.update(b":");
    hasher.update(sector.as_str().as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Uuid::from_bytes(bytes).to_string()
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CollectionInfoResponse {
    result: CollectionInfo,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    #[serde(default)]
    points_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CollectionsResponse {
    result: CollectionsList,
}

#[derive(Debug, Deserialize)]
struct CollectionsList {
    #[serde(default)]
    collections: Vec<CollectionDescription>,
}

#[derive(Debug, Deserialize)]
struct CollectionDescription {
    name: String,
}

/// Qdrant-backed vector store.
pub struct QdrantVectorStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    prefix: String,
    dimensions: usize,
    /// Collections already verified/created this process lifetime
    created: DashSet<String>,
}

impl QdrantVectorStore {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        prefix: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        let base_url = url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            prefix: prefix.into(),
            dimensions,
            created: DashSet::new(),
        }
    }

    fn collection_name(&self, namespace: &str) -> String {
        format!("{}{}", self.prefix, sanitize_namespace(namespace))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| VectorStoreError::Transport(e.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(VectorStoreError::Backend(format!("{}: {}", status, body)))
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let response = self
            .request(reqwest::Method::GET, &format!("/collections/{}", name))
            .send()
            .await
            .map_err(|e| VectorStoreError::Transport(e.to_string()))?;
        Ok(response.status().is_success())
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        let body = json!({
            "vectors": {
                "size": self.dimensions,
                "distance": "Cosine"
            },
            "hnsw_config": {
                "m": 16,
                "ef_construct": 100
            }
        });
        self.send(
            self.request(reqwest::Method::PUT, &format!("/collections/{}", name))
                .json(&body),
        )
        .await?;

        // Payload indexes; "already exists" responses are harmless
        for (field, schema) in [("sector", "keyword"), ("memory_id", "keyword")] {
            let body = json!({ "field_name": field, "field_schema": schema });
            let _ = self
                .request(reqwest::Method::PUT, &format!("/collections/{}/index", name))
                .json(&body)
                .send()
                .await;
        }
        Ok(())
    }

    fn sector_filter(sector: Sector) -> Value {
        json!({
            "must": [
                { "key": "sector", "match": { "value": sector.as_str() } }
            ]
        })
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn ensure_collection(&self, namespace: &str) -> Result<()> {
        let name = self.collection_name(namespace);
        if self.created.contains(&name) {
            return Ok(());
        }
        if !self.collection_exists(&name).await? {
            self.create_collection(&name).await?;
        }
        self.created.insert(name);
        Ok(())
    }

    async fn upsert(&self, namespace: &str, point: VectorPoint) -> Result<()> {
        self.batch_upsert(vec![(namespace.to_string(), point)]).await
    }

    async fn batch_upsert(&self, points: Vec<(String, VectorPoint)>) -> Result<()> {
        let mut grouped: HashMap<String, Vec<VectorPoint>> = HashMap::new();
        for (namespace, point) in points {
            if point.vector.len() != self.dimensions {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: self.dimensions,
                    got: point.vector.len(),
                });
            }
            grouped.entry(namespace).or_default().push(point);
        }

        for (namespace, points) in grouped {
            self.ensure_collection(&namespace).await?;
            let name = self.collection_name(&namespace);
            let body = json!({
                "points": points
                    .iter()
                    .map(|p| {
                        json!({
                            "id": point_id(&p.memory_id, p.sector),
                            "vector": p.vector,
                            "payload": {
                                "memory_id": p.memory_id,
                                "sector": p.sector.as_str(),
                                "namespace": namespace,
                            }
                        })
                    })
                    .collect::<Vec<_>>()
            });
            self.send(
                self.request(
                    reqwest::Method::PUT,
                    &format!("/collections/{}/points?wait=true", name),
                )
                .json(&body),
            )
            .await?;
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
        let body = json!({
            "vector": query,
            "limit": top_n,
            "with_payload": true,
            "filter": Self::sector_filter(sector),
        });
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/search", name),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorStoreError::Transport(e.to_string()))?;

        // A namespace that was never written to has no collection
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::Backend(format!("{}: {}", status, body)));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| VectorStoreError::Backend(e.to_string()))?;

        Ok(parsed
            .result
            .into_iter()
            .filter_map(|p| {
                let payload = p.payload?;
                let memory_id = payload.get("memory_id")?.as_str()?.to_string();
                Some(VectorHit {
                    memory_id,
                    sector,
                    score: p.score,
                })
            })
            .collect())
    }

    async fn delete(&self, namespace: &str, memory_id: &str, sector: Option<Sector>) -> Result<()> {
        self.batch_delete(namespace, &[memory_id.to_string()], sector)
            .await
    }

    async fn batch_delete(
        &self,
        namespace: &str,
        memory_ids: &[String],
        sector: Option<Sector>,
    ) -> Result<()> {
        if memory_ids.is_empty() {
            return Ok(());
        }
        let name = self.collection_name(namespace);
        let mut must = vec![json!({
            "key": "memory_id",
            "match": { "any": memory_ids }
        })];
        if let Some(sector) = sector {
            must.push(json!({ "key": "sector", "match": { "value": sector.as_str() } }));
        }
        let body = json!({ "filter": { "must": must } });
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/delete?wait=true", name),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorStoreError::Transport(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::Backend(format!("{}: {}", status, body)));
        }
        Ok(())
    }

    async fn stats(&self, namespace: Option<&str>) -> Result<VectorStoreStats> {
        let mut stats = VectorStoreStats::default();

        let names: Vec<String> = match namespace {
            Some(ns) => vec![self.collection_name(ns)],
            None => {
                let response = self.send(self.request(reqwest::Method::GET, "/collections")).await?;
                let parsed: CollectionsResponse = response
                    .json()
                    .await
                    .map_err(|e| VectorStoreError::Backend(e.to_string()))?;
                parsed
                    .result
                    .collections
                    .into_iter()
                    .map(|c| c.name)
                    .filter(|n| n.starts_with(&self.prefix))
                    .collect()
            }
        };

        for name in names {
            let response = self
                .request(reqwest::Method::GET, &format!("/collections/{}", name))
                .send()
                .await
                .map_err(|e| VectorStoreError::Transport(e.to_string()))?;
            if !response.status().is_success() {
                continue;
            }
            let parsed: CollectionInfoResponse = response
                .json()
                .await
                .map_err(|e| VectorStoreError::Backend(e.to_string()))?;
            let count = parsed.result.points_count.unwrap_or(0);
            stats.collections.insert(name, count);
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

    #[test]
    fn test_point_id_is_deterministic() {
        let a = point_id("m1", Sector::Semantic);
        let b = point_id("m1", Sector::Semantic);
        assert_eq!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_point_id_varies_by_sector() {
        assert_ne!(point_id("m1", Sector::Semantic), point_id("m1", Sector::Episodic));
        assert_ne!(point_id("m1", Sector::Semantic), point_id("m2", Sector::Semantic));
    }

    #[test]
    fn test_collection_name_uses_prefix_and_sanitization() {
        let store = QdrantVectorStore::new("http://localhost:6333", None, "openmemory_vectors_", 8);
        assert_eq!(
            store.collection_name("acme/prod"),
            "openmemory_vectors_acme_prod"
        );
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let store = QdrantVectorStore::new("http://localhost:6333/", None, "p_", 8);
        assert_eq!(store.base_url, "http://localhost:6333");
    }

    #[test]
    fn test_sector_filter_shape() {
        let filter = QdrantVectorStore::sector_filter(Sector::Emotional);
        assert_eq!(filter["must"][0]["key"], "sector");
        assert_eq!(filter["must"][0]["match"]["value"], "emotional");
    }
}
