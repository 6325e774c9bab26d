//! REST surface
//!
//! JSON in/out, `X-Namespace` header selects the default namespace, and the
//! error envelope carries the engine's taxonomy. Authorization is delegated
//! to an external proxy and never processed here.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::error;

use openmemory_core::engine::UpdateInput;
use openmemory_core::memory::{NamespaceRecord, QueryInput, Sector, StoreInput};
use openmemory_core::temporal::FactInput;
use openmemory_core::{EngineError, MetadataStore, DEFAULT_NAMESPACE};

use crate::mcp::server::McpServer;
use crate::state::AppState;

const NAMESPACE_HEADER: &str = "x-namespace";

// ============================================================================
// ERROR ENVELOPE
// ============================================================================

/// JSON error response: `{"error": {"kind": ..., "message": ...}}`.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            // Namespace access reads as not-found to avoid an existence leak
            EngineError::NotFound(_) | EngineError::NamespaceAccess(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            EngineError::Embed(_) => (StatusCode::SERVICE_UNAVAILABLE, "embedding_unavailable"),
            EngineError::VectorStore(_) => (StatusCode::SERVICE_UNAVAILABLE, "vector_store"),
            EngineError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            EngineError::Canceled => (StatusCode::GATEWAY_TIMEOUT, "canceled"),
            EngineError::Metadata(_) | EngineError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {}", self.0);
        }
        let message = match &self.0 {
            // Never leak storage internals to the caller
            EngineError::Metadata(_) | EngineError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        let body = json!({ "error": { "kind": kind, "message": message } });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Apply the per-request deadline to an engine call.
async fn with_timeout<T>(
    state: &AppState,
    fut: impl std::future::Future<Output = openmemory_core::engine::Result<T>>,
) -> ApiResult<T> {
    let deadline = std::time::Duration::from_secs(state.config.request_timeout_secs.max(1));
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result.map_err(ApiError),
        Err(_) => Err(ApiError(EngineError::Timeout)),
    }
}

fn header_namespace(headers: &HeaderMap) -> Option<String> {
    headers
        .get(NAMESPACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn router(state: AppState, mcp: McpServer) -> Router {
    Router::new()
        .route("/memory/add", post(memory_add))
        .route("/memory/query", post(memory_query))
        .route("/memory/reinforce", post(memory_reinforce))
        .route("/memory/all", get(memory_all))
        .route(
            "/memory/{id}",
            get(memory_get).patch(memory_patch).delete(memory_delete),
        )
        .route("/api/namespaces", get(namespaces_list).post(namespace_create))
        .route(
            "/api/namespaces/{namespace}",
            get(namespace_get).put(namespace_put).delete(namespace_delete),
        )
        .route("/api/temporal/facts", get(facts_query).post(fact_insert))
        .route("/health", get(health))
        .route("/mcp", post(mcp_handler).with_state(mcp))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// MEMORY HANDLERS
// ============================================================================

async fn memory_add(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut input): Json<StoreInput>,
) -> ApiResult<Json<Value>> {
    if input.namespaces.is_empty() {
        if let Some(ns) = header_namespace(&headers) {
            input.namespaces = vec![ns];
        }
    }
    let receipt = with_timeout(&state, state.engine.store_memory(input)).await?;
    Ok(Json(serde_json::to_value(receipt).unwrap_or_default()))
}

async fn memory_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut input): Json<QueryInput>,
) -> ApiResult<Json<Value>> {
    if input.filters.namespaces.is_empty() {
        if let Some(ns) = header_namespace(&headers) {
            input.filters.namespaces = vec![ns];
        }
    }
    let response = with_timeout(&state, state.engine.query(input)).await?;
    Ok(Json(serde_json::to_value(response).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReinforceBody {
    id: String,
    boost: Option<f64>,
}

async fn memory_reinforce(
    State(state): State<AppState>,
    Json(body): Json<ReinforceBody>,
) -> ApiResult<Json<Value>> {
    let boost = body
        .boost
        .unwrap_or(state.config.salience_boost)
        .clamp(0.0, 1.0);
    let salience = with_timeout(&state, state.engine.reinforce(&body.id, boost)).await?;
    Ok(Json(json!({ "ok": true, "salience": salience })))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    /// Lower bound (offset)
    l: Option<i64>,
    /// Upper bound (exclusive)
    u: Option<i64>,
    namespace: Option<String>,
    sector: Option<String>,
}

async fn memory_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let offset = params.l.unwrap_or(0).max(0);
    let limit = (params.u.unwrap_or(offset + 50) - offset).clamp(1, 500);
    let sector = match params.sector.as_deref() {
        Some(raw) => Some(Sector::parse_name(raw).ok_or_else(|| {
            ApiError(EngineError::Validation(format!("unknown sector: {}", raw)))
        })?),
        None => None,
    };
    let namespace = params.namespace.or_else(|| header_namespace(&headers));

    let memories = with_timeout(
        &state,
        state.engine.list(namespace.as_deref(), sector, offset, limit),
    )
    .await?;
    let items: Vec<Value> = memories
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "content": m.content,
                "primarySector": m.primary_sector,
                "sectors": m.sectors,
                "namespaces": m.namespaces,
                "tags": m.tags,
                "salience": m.salience,
                "lastSeenAt": m.last_seen_at,
                "createdAt": m.created_at,
                "fingerprinted": m.fingerprinted,
            })
        })
        .collect();
    Ok(Json(json!({ "total": items.len(), "items": items })))
}

#[derive(Debug, Deserialize)]
struct GetParams {
    /// Comma-separated namespace scope
    namespaces: Option<String>,
}

fn split_namespaces(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

async fn memory_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<GetParams>,
) -> ApiResult<Json<Value>> {
    let mut namespaces = split_namespaces(params.namespaces.as_deref());
    if namespaces.is_empty() {
        if let Some(ns) = header_namespace(&headers) {
            namespaces = vec![ns];
        }
    }
    let memory = with_timeout(&state, state.engine.get(&id, &namespaces)).await?;
    Ok(Json(serde_json::to_value(memory).unwrap_or_default()))
}

async fn memory_patch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<UpdateInput>,
) -> ApiResult<Json<Value>> {
    let memory = with_timeout(&state, state.engine.update(&id, patch)).await?;
    Ok(Json(serde_json::to_value(memory).unwrap_or_default()))
}

async fn memory_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let deleted = with_timeout(&state, state.engine.delete(&id)).await?;
    if !deleted {
        return Err(ApiError(EngineError::NotFound(id)));
    }
    Ok(Json(json!({ "ok": true })))
}

// ============================================================================
// NAMESPACE HANDLERS
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct NamespaceBody {
    namespace: Option<String>,
    description: Option<String>,
    ontology_profile: Option<String>,
    metadata_json: Option<String>,
}

async fn namespaces_list(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let namespaces = state
        .engine
        .store()
        .list_namespaces()
        .await
        .map_err(EngineError::from)?;
    Ok(Json(serde_json::to_value(namespaces).unwrap_or_default()))
}

async fn namespace_create(
    State(state): State<AppState>,
    Json(body): Json<NamespaceBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let namespace = body
        .namespace
        .as_deref()
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
        .ok_or_else(|| ApiError(EngineError::Validation("namespace is required".to_string())))?;
    let record = namespace_record(namespace, body.description, body.ontology_profile, body.metadata_json);
    state
        .engine
        .store()
        .upsert_namespace(&record)
        .await
        .map_err(EngineError::from)?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(record).unwrap_or_default())))
}

async fn namespace_get(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> ApiResult<Json<Value>> {
    let record = state
        .engine
        .store()
        .get_namespace(&namespace)
        .await
        .map_err(EngineError::from)?
        .ok_or_else(|| ApiError(EngineError::NotFound(namespace.clone())))?;
    let summary = state
        .engine
        .store()
        .get_user_summary(&namespace)
        .await
        .map_err(EngineError::from)?;
    let mut value = serde_json::to_value(record).unwrap_or_default();
    if let (Some(obj), Some(summary)) = (value.as_object_mut(), summary) {
        obj.insert(
            "userSummary".to_string(),
            serde_json::to_value(summary).unwrap_or_default(),
        );
    }
    Ok(Json(value))
}

async fn namespace_put(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Json(body): Json<NamespaceBody>,
) -> ApiResult<Json<Value>> {
    let record = namespace_record(&namespace, body.description, body.ontology_profile, body.metadata_json);
    state
        .engine
        .store()
        .upsert_namespace(&record)
        .await
        .map_err(EngineError::from)?;
    Ok(Json(serde_json::to_value(record).unwrap_or_default()))
}

async fn namespace_delete(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> ApiResult<Json<Value>> {
    let deleted = state
        .engine
        .store()
        .delete_namespace(&namespace)
        .await
        .map_err(EngineError::from)?;
    if !deleted {
        return Err(ApiError(EngineError::NotFound(namespace)));
    }
    Ok(Json(json!({ "ok": true })))
}

fn namespace_record(
    namespace: &str,
    description: Option<String>,
    ontology_profile: Option<String>,
    metadata_json: Option<String>,
) -> NamespaceRecord {
    let now = chrono::Utc::now().timestamp();
    NamespaceRecord {
        namespace: namespace.to_string(),
        description,
        ontology_profile,
        metadata_json,
        created_at: now,
        updated_at: now,
        active: true,
    }
}

// ============================================================================
// TEMPORAL FACT HANDLERS
// ============================================================================

async fn fact_insert(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut input): Json<FactInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if input.namespace.is_none() {
        input.namespace = header_namespace(&headers);
    }
    let fact = with_timeout(&state, state.facts.insert(input)).await?;
    Ok((StatusCode::CREATED, Json(json!({ "fact_id": fact.id }))))
}

#[derive(Debug, Deserialize)]
struct FactParams {
    subject: Option<String>,
    predicate: Option<String>,
    at: Option<i64>,
    namespace: Option<String>,
}

async fn facts_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FactParams>,
) -> ApiResult<Json<Value>> {
    let namespace = params
        .namespace
        .or_else(|| header_namespace(&headers))
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    let facts = with_timeout(
        &state,
        state.facts.query_at(
            params.subject.as_deref(),
            params.predicate.as_deref(),
            params.at,
            &namespace,
        ),
    )
    .await?;
    Ok(Json(serde_json::to_value(facts).unwrap_or_default()))
}

// ============================================================================
// HEALTH + MCP FRAMING
// ============================================================================

async fn health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let stats = state.engine.stats().await?;
    Ok(Json(json!({
        "status": "ok",
        "version": openmemory_core::VERSION,
        "provider": state.engine.embedder().provider_name(),
        "stats": stats,
    })))
}

/// JSON-RPC over HTTP: one request per POST, same envelope as stdio.
async fn mcp_handler(
    State(mcp): State<McpServer>,
    Json(request): Json<crate::mcp::types::JsonRpcRequest>,
) -> Json<Value> {
    match mcp.handle_request(request).await {
        Some(response) => Json(serde_json::to_value(response).unwrap_or_default()),
        None => Json(json!({})),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_namespaces() {
        assert_eq!(
            split_namespaces(Some("alice, bob ,,")),
            vec!["alice".to_string(), "bob".to_string()]
        );
        assert!(split_namespaces(None).is_empty());
    }

    #[test]
    fn test_error_mapping() {
        let cases = [
            (EngineError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (EngineError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (EngineError::NamespaceAccess("x".into()), StatusCode::NOT_FOUND),
            (EngineError::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (EngineError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_internal_errors_do_not_leak_details() {
        let err = ApiError(EngineError::Internal("secret connection string".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
