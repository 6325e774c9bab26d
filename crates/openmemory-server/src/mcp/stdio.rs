//! stdio transport - line-framed JSON-RPC over stdin/stdout
//!
//! One request per line in, one response per line out. Logging goes to
//! stderr so stdout stays clean for the protocol.

use std::io::{self, BufRead, BufReader, Write};

use tracing::{debug, error, warn};

use super::server::McpServer;
use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

const FALLBACK_ERROR: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

/// stdio transport for the MCP server.
pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }

    /// Pump stdin lines through the server until EOF.
    pub async fn run(self, server: McpServer) -> Result<(), io::Error> {
        let stdin = io::stdin();
        let stdout = io::stdout();

        let reader = BufReader::new(stdin.lock());
        let mut stdout = stdout.lock();

        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    error!("failed to read line: {}", e);
                    break;
                }
            };
            if line.is_empty() {
                continue;
            }
            debug!("received {} bytes", line.len());

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("failed to parse request: {}", e);
                    let response = JsonRpcResponse::error(None, JsonRpcError::parse_error());
                    write_response(&mut stdout, &response)?;
                    continue;
                }
            };

            if let Some(response) = server.handle_request(request).await {
                write_response(&mut stdout, &response)?;
            }
        }

        Ok(())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn write_response(stdout: &mut impl Write, response: &JsonRpcResponse) -> io::Result<()> {
    match serde_json::to_string(response) {
        Ok(json) => {
            debug!("sending {} bytes", json.len());
            writeln!(stdout, "{}", json)?;
        }
        Err(e) => {
            // Send a minimal error so the client doesn't hang
            error!("failed to serialize response: {}", e);
            writeln!(stdout, "{}", FALLBACK_ERROR)?;
        }
    }
    stdout.flush()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_response_is_line_framed() {
        let response = JsonRpcResponse::success(Some(serde_json::json!(1)), serde_json::json!({}));
        let mut buf: Vec<u8> = Vec::new();
        write_response(&mut buf, &response).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);
        let parsed: JsonRpcResponse = serde_json::from_str(text.trim()).unwrap();
        assert!(parsed.result.is_some());
    }

    #[test]
    fn test_fallback_error_is_valid_json() {
        let parsed: JsonRpcResponse = serde_json::from_str(FALLBACK_ERROR).unwrap();
        assert_eq!(parsed.error.unwrap().code, -32603);
    }
}
