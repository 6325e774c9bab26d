//! MCP adapter - JSON-RPC 2.0 tool surface over the engine
//!
//! Tools map 1:1 onto engine operations. Transport is either line-framed
//! stdio or HTTP framing (POST /mcp); both carry the same envelope.

pub mod server;
pub mod stdio;
pub mod tools;
pub mod types;
