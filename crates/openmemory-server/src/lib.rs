//! OpenMemory server - thin external surfaces over the HSG engine
//!
//! Two adapters share one engine: a REST/JSON router (axum) and an MCP
//! JSON-RPC surface served over line-framed stdio or HTTP framing.

pub mod http;
pub mod mcp;
pub mod state;

pub use state::AppState;
