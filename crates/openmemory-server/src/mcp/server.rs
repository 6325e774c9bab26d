//! MCP server core - request routing
//!
//! Dispatches `initialize`, `tools/list`, and `tools/call` onto the tool
//! modules. Clone-cheap so the HTTP framing can hold it as router state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::tools;
use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};
use crate::state::AppState;

/// MCP server over the shared engine state.
#[derive(Clone)]
pub struct McpServer {
    state: AppState,
    initialized: Arc<AtomicBool>,
}

impl McpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle one JSON-RPC request. Notifications return `None`.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("handling request: {}", request.method);

        if request.jsonrpc != super::types::JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
            ));
        }

        if !self.initialized.load(Ordering::Acquire)
            && request.method != "initialize"
            && request.method != "notifications/initialized"
            && request.method != "ping"
        {
            warn!("rejecting '{}': server not initialized", request.method);
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(),
            "notifications/initialized" => return None,
            "tools/list" => Ok(self.tools_list()),
            "tools/call" => self.handle_tools_call(request.params).await,
            "ping" => Ok(json!({})),
            method => {
                warn!("unknown method: {}", method);
                Err(JsonRpcError::method_not_found())
            }
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(&self) -> Result<Value, JsonRpcError> {
        self.initialized.store(true, Ordering::Release);
        Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": "openmemory",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "instructions":
                "OpenMemory is a sectored long-term memory store. Use openmemory_store to \
                 remember, openmemory_query to retrieve, and openmemory_reinforce when a \
                 memory proved useful. Memories decay over time unless reinforced.",
        }))
    }

    fn tools_list(&self) -> Value {
        let tools = json!([
            {
                "name": "openmemory_query",
                "description": "Hybrid search over stored memories (vector + keyword + salience). Returns ranked matches.",
                "inputSchema": tools::query::schema(),
            },
            {
                "name": "openmemory_store",
                "description": "Store a new memory. It is routed into cognitive sectors and embedded per sector.",
                "inputSchema": tools::store::schema(),
            },
            {
                "name": "openmemory_reinforce",
                "description": "Bump a memory's salience so it decays more slowly. Use when a memory proved helpful.",
                "inputSchema": tools::reinforce::schema(),
            },
            {
                "name": "openmemory_list",
                "description": "Page through stored memories, optionally filtered by namespace and sector.",
                "inputSchema": tools::list::schema(),
            },
            {
                "name": "openmemory_get",
                "description": "Fetch one memory by id, optionally scoped to namespaces.",
                "inputSchema": tools::get::schema(),
            },
            {
                "name": "query_memory",
                "description": "Namespace-explicit search: query one namespace's memories.",
                "inputSchema": tools::scoped::query_schema(),
            },
            {
                "name": "store_memory",
                "description": "Namespace-explicit store: write a memory into one namespace.",
                "inputSchema": tools::scoped::store_schema(),
            },
            {
                "name": "reinforce_memory",
                "description": "Namespace-explicit reinforcement of a memory id.",
                "inputSchema": tools::scoped::reinforce_schema(),
            },
            {
                "name": "list_namespaces",
                "description": "List namespace groups known to the store.",
                "inputSchema": tools::namespaces::schema(),
            },
            {
                "name": "temporal_fact_insert",
                "description": "Insert a (subject, predicate, object) fact; closes the previously current row.",
                "inputSchema": tools::facts::insert_schema(),
            },
            {
                "name": "temporal_fact_query",
                "description": "Point-in-time fact lookup: rows valid at the given instant.",
                "inputSchema": tools::facts::query_schema(),
            },
        ]);
        json!({ "tools": tools })
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("missing params"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("missing tool name"))?
            .to_string();
        let arguments = params.get("arguments").cloned();

        let result = match name.as_str() {
            "openmemory_query" => tools::query::execute(&self.state, arguments).await,
            "openmemory_store" => tools::store::execute(&self.state, arguments).await,
            "openmemory_reinforce" => tools::reinforce::execute(&self.state, arguments).await,
            "openmemory_list" => tools::list::execute(&self.state, arguments).await,
            "openmemory_get" => tools::get::execute(&self.state, arguments).await,
            "query_memory" => tools::scoped::query(&self.state, arguments).await,
            "store_memory" => tools::scoped::store(&self.state, arguments).await,
            "reinforce_memory" => tools::scoped::reinforce(&self.state, arguments).await,
            "list_namespaces" => tools::namespaces::execute(&self.state, arguments).await,
            "temporal_fact_insert" => tools::facts::insert(&self.state, arguments).await,
            "temporal_fact_query" => tools::facts::query(&self.state, arguments).await,
            other => {
                return Err(JsonRpcError::invalid_params(&format!(
                    "unknown tool: {}",
                    other
                )))
            }
        };

        match result {
            Ok(value) => Ok(json!({
                "content": [
                    {
                        "type": "text",
                        "text": serde_json::to_string_pretty(&value)
                            .unwrap_or_else(|_| value.to_string()),
                    }
                ],
                "isError": false,
            })),
            Err(message) => Ok(json!({
                "content": [ { "type": "text", "text": message } ],
                "isError": true,
            })),
        }
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

    use openmemory_core::{Config, EmbedderHandle, HsgEngine, InProcVectorStore, SqliteStore};

    fn test_server() -> (McpServer, TempDir) {
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
        (McpServer::new(AppState::new(engine)), dir)
    }

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(1)),
            method: method.to_string(),
            params,
        }
    }

    async fn initialize(server: &McpServer) {
        let response = server
            .handle_request(request("initialize", None))
            .await
            .unwrap();
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_rejects_before_initialize() {
        let (server, _dir) = test_server();
        let response = server
            .handle_request(request("tools/list", None))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32003);
    }

    #[tokio::test]
    async fn test_initialize_then_tools_list() {
        let (server, _dir) = test_server();
        initialize(&server).await;
        let response = server
            .handle_request(request("tools/list", None))
            .await
            .unwrap();
        let tools = response.result.unwrap();
        let names: Vec<&str> = tools["tools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        for expected in [
            "openmemory_query",
            "openmemory_store",
            "openmemory_reinforce",
            "openmemory_list",
            "openmemory_get",
            "query_memory",
            "store_memory",
            "reinforce_memory",
            "list_namespaces",
            "temporal_fact_insert",
            "temporal_fact_query",
        ] {
            assert!(names.contains(&expected), "missing tool {}", expected);
        }
    }

    #[tokio::test]
    async fn test_tools_call_store_and_query() {
        let (server, _dir) = test_server();
        initialize(&server).await;

        let response = server
            .handle_request(request(
                "tools/call",
                Some(json!({
                    "name": "openmemory_store",
                    "arguments": { "content": "MCP round trip memory" }
                })),
            ))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);

        let response = server
            .handle_request(request(
                "tools/call",
                Some(json!({
                    "name": "openmemory_query",
                    "arguments": { "query": "MCP round trip memory", "k": 1 }
                })),
            ))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("\"total\": 1"));
    }

    #[tokio::test]
    async fn test_tool_error_is_not_protocol_error() {
        let (server, _dir) = test_server();
        initialize(&server).await;
        let response = server
            .handle_request(request(
                "tools/call",
                Some(json!({
                    "name": "openmemory_query",
                    "arguments": { "query": "" }
                })),
            ))
            .await
            .unwrap();
        // Tool-level failures surface inside the result payload
        assert!(response.error.is_none());
        assert_eq!(response.result.unwrap()["isError"], true);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (server, _dir) = test_server();
        initialize(&server).await;
        let response = server
            .handle_request(request("bogus/method", None))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_notification_has_no_response() {
        let (server, _dir) = test_server();
        initialize(&server).await;
        let mut req = request("notifications/initialized", None);
        req.id = None;
        assert!(server.handle_request(req).await.is_none());
    }

    #[tokio::test]
    async fn test_bad_jsonrpc_version() {
        let (server, _dir) = test_server();
        let mut req = request("initialize", None);
        req.jsonrpc = "1.0".to_string();
        let response = server.handle_request(req).await.unwrap();
        assert_eq!(response.error.unwrap().code, -32600);
    }
}
