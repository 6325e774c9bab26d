//! MCP tool implementations
//!
//! Each tool has a JSON-schema function and an `execute` function taking the
//! shared state plus the raw arguments. Errors come back as strings; the
//! server layer wraps them in the JSON-RPC envelope.

use serde::Deserialize;
use serde_json::{json, Value};

use openmemory_core::memory::{QueryFilters, QueryInput, Sector, StoreInput};
use openmemory_core::temporal::FactInput;
use openmemory_core::MetadataStore;

use crate::state::AppState;

type ToolResult = std::result::Result<Value, String>;

fn engine_err(e: openmemory_core::EngineError) -> String {
    e.to_string()
}

fn parse_args<T: for<'de> Deserialize<'de>>(args: Option<Value>) -> std::result::Result<T, String> {
    match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e)),
        None => Err("Missing arguments".to_string()),
    }
}

fn parse_sectors(raw: &Option<Vec<String>>) -> std::result::Result<Option<Vec<Sector>>, String> {
    match raw {
        None => Ok(None),
        Some(names) => {
            let mut sectors = Vec::with_capacity(names.len());
            for name in names {
                match Sector::parse_name(name) {
                    Some(s) => sectors.push(s),
                    None => return Err(format!("Unknown sector: {}", name)),
                }
            }
            Ok(Some(sectors))
        }
    }
}

fn match_to_json(m: &openmemory_core::QueryMatch) -> Value {
    serde_json::to_value(m).unwrap_or_default()
}

// ============================================================================
// QUERY
// ============================================================================

pub mod query {
    use super::*;

    pub fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search text" },
                "k": {
                    "type": "integer",
                    "description": "Maximum results (default 8, clamped to [1, 32])",
                    "default": 8, "minimum": 1, "maximum": 32
                },
                "namespaces": {
                    "type": "array", "items": { "type": "string" },
                    "description": "Namespace scope (default: [\"global\"])"
                },
                "sectors": {
                    "type": "array", "items": { "type": "string" },
                    "description": "Sector subset: episodic, semantic, procedural, emotional, reflective"
                },
                "minSalience": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["query"]
        })
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Args {
        query: String,
        k: Option<usize>,
        namespaces: Option<Vec<String>>,
        sectors: Option<Vec<String>>,
        min_salience: Option<f64>,
        tags: Option<Vec<String>>,
    }

    pub async fn execute(state: &AppState, args: Option<Value>) -> ToolResult {
        let args: Args = parse_args(args)?;
        if args.query.trim().is_empty() {
            return Err("Query cannot be empty".to_string());
        }
        let input = QueryInput {
            query: args.query.clone(),
            k: args.k.unwrap_or(8),
            filters: QueryFilters {
                namespaces: args.namespaces.unwrap_or_default(),
                sectors: parse_sectors(&args.sectors)?,
                min_salience: args.min_salience,
                tags: args.tags,
            },
        };
        let response = state.engine.query(input).await.map_err(engine_err)?;
        Ok(json!({
            "query": args.query,
            "total": response.matches.len(),
            "partial": response.partial,
            "matches": response.matches.iter().map(match_to_json).collect::<Vec<_>>(),
        }))
    }
}

// ============================================================================
// STORE
// ============================================================================

pub mod store {
    use super::*;

    pub fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "Text to remember" },
                "namespaces": {
                    "type": "array", "items": { "type": "string" },
                    "description": "Namespace labels (default: [\"global\"])"
                },
                "tags": { "type": "array", "items": { "type": "string" } },
                "metadata": { "type": "object", "description": "Opaque key/value payload" }
            },
            "required": ["content"]
        })
    }

    pub async fn execute(state: &AppState, args: Option<Value>) -> ToolResult {
        let input: StoreInput = parse_args(args)?;
        let receipt = state.engine.store_memory(input).await.map_err(engine_err)?;
        Ok(serde_json::to_value(receipt).unwrap_or_default())
    }
}

// ============================================================================
// REINFORCE
// ============================================================================

pub mod reinforce {
    use super::*;

    pub fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Memory id" },
                "boost": {
                    "type": "number",
                    "description": "Salience bump (default 0.1)",
                    "minimum": 0.0, "maximum": 1.0
                }
            },
            "required": ["id"]
        })
    }

    #[derive(Debug, Deserialize)]
    struct Args {
        id: String,
        boost: Option<f64>,
    }

    pub async fn execute(state: &AppState, args: Option<Value>) -> ToolResult {
        let args: Args = parse_args(args)?;
        let boost = args
            .boost
            .unwrap_or(state.config.salience_boost)
            .clamp(0.0, 1.0);
        let salience = state
            .engine
            .reinforce(&args.id, boost)
            .await
            .map_err(engine_err)?;
        Ok(json!({ "ok": true, "id": args.id, "salience": salience }))
    }
}

// ============================================================================
// LIST
// ============================================================================

pub mod list {
    use super::*;

    pub fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "namespace": { "type": "string" },
                "sector": { "type": "string" },
                "offset": { "type": "integer", "minimum": 0, "default": 0 },
                "limit": { "type": "integer", "minimum": 1, "maximum": 500, "default": 50 }
            }
        })
    }

    #[derive(Debug, Deserialize)]
    struct Args {
        namespace: Option<String>,
        sector: Option<String>,
        offset: Option<i64>,
        limit: Option<i64>,
    }

    pub async fn execute(state: &AppState, args: Option<Value>) -> ToolResult {
        let args: Args = match args {
            Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
            None => Args {
                namespace: None,
                sector: None,
                offset: None,
                limit: None,
            },
        };
        let sector = match args.sector.as_deref() {
            Some(raw) => Some(Sector::parse_name(raw).ok_or_else(|| format!("Unknown sector: {}", raw))?),
            None => None,
        };
        let memories = state
            .engine
            .list(
                args.namespace.as_deref(),
                sector,
                args.offset.unwrap_or(0),
                args.limit.unwrap_or(50),
            )
            .await
            .map_err(engine_err)?;
        let items: Vec<Value> = memories
            .iter()
            .map(|m| {
                json!({
                    "id": m.id,
                    "content": m.content,
                    "primarySector": m.primary_sector,
                    "namespaces": m.namespaces,
                    "tags": m.tags,
                    "salience": m.salience,
                    "createdAt": m.created_at,
                })
            })
            .collect();
        Ok(json!({ "total": items.len(), "items": items }))
    }
}

// ============================================================================
// GET
// ============================================================================

pub mod get {
    use super::*;

    pub fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "namespaces": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["id"]
        })
    }

    #[derive(Debug, Deserialize)]
    struct Args {
        id: String,
        namespaces: Option<Vec<String>>,
    }

    pub async fn execute(state: &AppState, args: Option<Value>) -> ToolResult {
        let args: Args = parse_args(args)?;
        let memory = state
            .engine
            .get(&args.id, &args.namespaces.unwrap_or_default())
            .await
            .map_err(engine_err)?;
        Ok(serde_json::to_value(memory).unwrap_or_default())
    }
}

// ============================================================================
// NAMESPACE-EXPLICIT VARIANTS
// ============================================================================

pub mod scoped {
    use super::*;

    pub fn query_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "namespace": { "type": "string" },
                "query": { "type": "string" },
                "k": { "type": "integer", "minimum": 1, "maximum": 32, "default": 8 }
            },
            "required": ["namespace", "query"]
        })
    }

    pub fn store_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "namespace": { "type": "string" },
                "content": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["namespace", "content"]
        })
    }

    pub fn reinforce_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "namespace": { "type": "string" },
                "id": { "type": "string" },
                "boost": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
            },
            "required": ["namespace", "id"]
        })
    }

    #[derive(Debug, Deserialize)]
    struct QueryArgs {
        namespace: String,
        query: String,
        k: Option<usize>,
    }

    pub async fn query(state: &AppState, args: Option<Value>) -> ToolResult {
        let args: QueryArgs = parse_args(args)?;
        super::query::execute(
            state,
            Some(json!({
                "query": args.query,
                "k": args.k.unwrap_or(8),
                "namespaces": [args.namespace],
            })),
        )
        .await
    }

    #[derive(Debug, Deserialize)]
    struct StoreArgs {
        namespace: String,
        content: String,
        tags: Option<Vec<String>>,
    }

    pub async fn store(state: &AppState, args: Option<Value>) -> ToolResult {
        let args: StoreArgs = parse_args(args)?;
        super::store::execute(
            state,
            Some(json!({
                "content": args.content,
                "namespaces": [args.namespace],
                "tags": args.tags.unwrap_or_default(),
            })),
        )
        .await
    }

    #[derive(Debug, Deserialize)]
    struct ReinforceArgs {
        namespace: String,
        id: String,
        boost: Option<f64>,
    }

    pub async fn reinforce(state: &AppState, args: Option<Value>) -> ToolResult {
        let args: ReinforceArgs = parse_args(args)?;
        // Scoping check first so a foreign id reads as not-found
        state
            .engine
            .get(&args.id, &[args.namespace.clone()])
            .await
            .map_err(engine_err)?;
        super::reinforce::execute(
            state,
            Some(json!({ "id": args.id, "boost": args.boost })),
        )
        .await
    }
}

// ============================================================================
// NAMESPACES
// ============================================================================

pub mod namespaces {
    use super::*;

    pub fn schema() -> Value {
        json!({ "type": "object", "properties": {} })
    }

    pub async fn execute(state: &AppState, _args: Option<Value>) -> ToolResult {
        let records = state
            .engine
            .store()
            .list_namespaces()
            .await
            .map_err(|e| engine_err(e.into()))?;
        Ok(serde_json::to_value(records).unwrap_or_default())
    }
}

// ============================================================================
// TEMPORAL FACTS
// ============================================================================

pub mod facts {
    use super::*;

    pub fn insert_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "subject": { "type": "string" },
                "predicate": { "type": "string" },
                "object": { "type": "string" },
                "namespace": { "type": "string" },
                "validFrom": { "type": "integer", "description": "Unix seconds (default now)" },
                "validTo": { "type": "integer" },
                "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
            },
            "required": ["subject", "predicate", "object"]
        })
    }

    pub fn query_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "subject": { "type": "string" },
                "predicate": { "type": "string" },
                "at": { "type": "integer", "description": "Unix seconds (default now)" },
                "namespace": { "type": "string", "default": "global" }
            }
        })
    }

    pub async fn insert(state: &AppState, args: Option<Value>) -> ToolResult {
        let input: FactInput = parse_args(args)?;
        let fact = state.facts.insert(input).await.map_err(engine_err)?;
        Ok(json!({ "fact_id": fact.id }))
    }

    #[derive(Debug, Deserialize)]
    struct QueryArgs {
        subject: Option<String>,
        predicate: Option<String>,
        at: Option<i64>,
        namespace: Option<String>,
    }

    pub async fn query(state: &AppState, args: Option<Value>) -> ToolResult {
        let args: QueryArgs = match args {
            Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
            None => QueryArgs {
                subject: None,
                predicate: None,
                at: None,
                namespace: None,
            },
        };
        let namespace = args
            .namespace
            .unwrap_or_else(|| openmemory_core::DEFAULT_NAMESPACE.to_string());
        let facts = state
            .facts
            .query_at(args.subject.as_deref(), args.predicate.as_deref(), args.at, &namespace)
            .await
            .map_err(engine_err)?;
        Ok(serde_json::to_value(facts).unwrap_or_default())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    use openmemory_core::{
        Config, EmbedderHandle, HsgEngine, InProcVectorStore, SqliteStore,
    };

    fn test_state() -> (AppState, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.vec_dim = 32;
        config.resolve_tier();
        let config = Arc::new(config);
        let store = Arc::new(SqliteStore::open(dir.path().join("mcp.db")).unwrap());
        let vectors = Arc::new(InProcVectorStore::new(
            config.vec_dim,
            config.collection_prefix.clone(),
        ));
        let embedder = Arc::new(EmbedderHandle::from_config(&config));
        let engine = Arc::new(HsgEngine::new(config, store, vectors, embedder));
        (AppState::new(engine), dir)
    }

    // ========================================================================
    // ARGUMENT VALIDATION
    // ========================================================================

    #[tokio::test]
    async fn test_query_requires_arguments() {
        let (state, _dir) = test_state();
        assert!(query::execute(&state, None).await.is_err());
    }

    #[tokio::test]
    async fn test_query_rejects_empty_query() {
        let (state, _dir) = test_state();
        let result = query::execute(&state, Some(json!({ "query": "  " }))).await;
        assert!(result.unwrap_err().contains("empty"));
    }

    #[tokio::test]
    async fn test_query_rejects_unknown_sector() {
        let (state, _dir) = test_state();
        let result = query::execute(
            &state,
            Some(json!({ "query": "x", "sectors": ["bogus"] })),
        )
        .await;
        assert!(result.unwrap_err().contains("Unknown sector"));
    }

    #[tokio::test]
    async fn test_store_rejects_unknown_fields() {
        let (state, _dir) = test_state();
        let result = store::execute(
            &state,
            Some(json!({ "content": "x", "apiKey": "sneaky" })),
        )
        .await;
        assert!(result.unwrap_err().contains("Invalid arguments"));
    }

    // ========================================================================
    // STORE + QUERY FLOW
    // ========================================================================

    #[tokio::test]
    async fn test_store_then_query_round_trip() {
        let (state, _dir) = test_state();
        let stored = store::execute(
            &state,
            Some(json!({ "content": "Rust ownership prevents data races" })),
        )
        .await
        .unwrap();
        let id = stored["id"].as_str().unwrap().to_string();

        let result = query::execute(
            &state,
            Some(json!({ "query": "Rust ownership prevents data races", "k": 1 })),
        )
        .await
        .unwrap();
        assert_eq!(result["total"], 1);
        assert_eq!(result["matches"][0]["id"], Value::String(id));
    }

    #[tokio::test]
    async fn test_scoped_query_is_namespaced() {
        let (state, _dir) = test_state();
        scoped::store(
            &state,
            Some(json!({ "namespace": "alice", "content": "alice secret plan" })),
        )
        .await
        .unwrap();

        let bob = scoped::query(
            &state,
            Some(json!({ "namespace": "bob", "query": "alice secret plan" })),
        )
        .await
        .unwrap();
        assert_eq!(bob["total"], 0);

        let alice = scoped::query(
            &state,
            Some(json!({ "namespace": "alice", "query": "alice secret plan" })),
        )
        .await
        .unwrap();
        assert_eq!(alice["total"], 1);
    }

    #[tokio::test]
    async fn test_scoped_reinforce_hides_foreign_ids() {
        let (state, _dir) = test_state();
        let stored = store::execute(
            &state,
            Some(json!({ "content": "scoped", "namespaces": ["alice"] })),
        )
        .await
        .unwrap();
        let id = stored["id"].as_str().unwrap();

        let foreign = scoped::reinforce(
            &state,
            Some(json!({ "namespace": "bob", "id": id })),
        )
        .await;
        assert!(foreign.unwrap_err().contains("not found"));

        let own = scoped::reinforce(
            &state,
            Some(json!({ "namespace": "alice", "id": id })),
        )
        .await
        .unwrap();
        assert_eq!(own["ok"], true);
    }

    // ========================================================================
    // FACTS
    // ========================================================================

    #[tokio::test]
    async fn test_fact_insert_and_query() {
        let (state, _dir) = test_state();
        facts::insert(
            &state,
            Some(json!({
                "subject": "OpenAI", "predicate": "has_CEO", "object": "Sam",
                "validFrom": 100
            })),
        )
        .await
        .unwrap();

        let result = facts::query(
            &state,
            Some(json!({ "subject": "OpenAI", "at": 150 })),
        )
        .await
        .unwrap();
        assert_eq!(result.as_array().unwrap().len(), 1);
        assert_eq!(result[0]["object"], "Sam");
    }

    // ========================================================================
    // SCHEMAS
    // ========================================================================

    #[test]
    fn test_schemas_declare_required_fields() {
        assert!(query::schema()["required"]
            .as_array()
            .unwrap()
            .contains(&json!("query")));
        assert!(store::schema()["required"]
            .as_array()
            .unwrap()
            .contains(&json!("content")));
        assert!(facts::insert_schema()["required"]
            .as_array()
            .unwrap()
            .contains(&json!("subject")));
        assert_eq!(scoped::query_schema()["properties"]["k"]["maximum"], 32);
    }
}
