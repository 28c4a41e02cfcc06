//! MCP tool source: connects to an MCP server over Streamable HTTP and
//! implements [`ToolSource`] via `tools/list` and `tools/call`.
//!
//! Only the HTTP transport is implemented here (no stdio subprocess) — see
//! `DESIGN.md` for the scoping rationale. POSTs one JSON-RPC message per
//! call, accepts both a single `application/json` response and a
//! `text/event-stream` response carrying one `data:` frame.

use std::sync::Mutex;

use mcp_core::{ErrorObject, MessageId, NotificationMessage, RequestMessage, ResultMessage};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ToolCallContent, ToolSource, ToolSourceError, ToolSpec};

const MCP_PROTOCOL_VERSION: &str = "2025-11-25";
const INITIALIZE_REQUEST_ID: &str = "adnify-mcp-initialize";

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    id: Option<MessageId>,
    result: Option<Value>,
    error: Option<JsonRpcErrorBody>,
}

/// Parses a JSON-RPC response out of an HTTP body, accepting either a bare
/// `application/json` object or a `text/event-stream` body carrying one or
/// more `data:` frames (the first frame with a `result`/`error` wins).
fn parse_json_rpc_from_body(
    body: &str,
    content_type: Option<&reqwest::header::HeaderValue>,
) -> Result<JsonRpcResponse, ToolSourceError> {
    let is_sse = content_type
        .and_then(|v| v.to_str().ok())
        .map(|s| s.contains("text/event-stream"))
        .unwrap_or(false);

    if !is_sse {
        return serde_json::from_str(body)
            .map_err(|e| ToolSourceError::Transport(format!("response json: {e}")));
    }

    let mut data_buffer = String::new();
    let mut flush = |buf: &mut String| -> Option<JsonRpcResponse> {
        if buf.is_empty() {
            return None;
        }
        let parsed = serde_json::from_str::<JsonRpcResponse>(buf).ok();
        if let Some(r) = &parsed {
            if r.result.is_none() && r.error.is_none() {
                buf.clear();
                return None;
            }
        }
        buf.clear();
        parsed
    };
    for line in body.lines() {
        if let Some(data) = line.strip_prefix("data: ") {
            if data.is_empty() || data == "[DONE]" {
                if let Some(r) = flush(&mut data_buffer) {
                    return Ok(r);
                }
                continue;
            }
            if data_buffer.is_empty() {
                data_buffer = data.to_string();
            } else {
                data_buffer.push('\n');
                data_buffer.push_str(data);
            }
            if let Ok(r) = serde_json::from_str::<JsonRpcResponse>(&data_buffer) {
                if r.result.is_some() || r.error.is_some() {
                    return Ok(r);
                }
            }
        } else if line.trim().is_empty() {
            if let Some(r) = flush(&mut data_buffer) {
                return Ok(r);
            }
        }
    }
    if let Some(r) = flush(&mut data_buffer) {
        return Ok(r);
    }
    Err(ToolSourceError::Transport(
        "SSE stream: no JSON-RPC response (result/error) found".into(),
    ))
}

/// Tool source backed by one MCP server reached over Streamable HTTP.
///
/// Performs the `initialize` handshake on construction, then exposes
/// `tools/list`/`tools/call` through [`ToolSource`]. The MCP protocol client
/// itself stays in scope only as a tool source, per this crate's spec.
pub struct McpToolSource {
    client: Client,
    url: String,
    headers: Vec<(String, String)>,
    session_id: Mutex<Option<String>>,
}

impl McpToolSource {
    /// Creates a new HTTP MCP session and completes the initialize handshake.
    /// `headers` are sent on every request (e.g. an API key header).
    pub async fn new_http(
        url: impl Into<String>,
        headers: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Self, ToolSourceError> {
        let url = url.into();
        let headers: Vec<(String, String)> =
            headers.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| ToolSourceError::Transport(e.to_string()))?;
        let mut s = Self { client, url, headers, session_id: Mutex::new(None) };
        s.initialize().await?;
        Ok(s)
    }

    async fn post(&self, body: Vec<u8>) -> Result<reqwest::Response, ToolSourceError> {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("MCP-Protocol-Version", MCP_PROTOCOL_VERSION)
            .body(body);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Ok(guard) = self.session_id.lock() {
            if let Some(ref sid) = *guard {
                req = req.header("MCP-Session-Id", sid.as_str());
            }
        }
        req.send().await.map_err(|e| ToolSourceError::Transport(e.to_string()))
    }

    async fn initialize(&mut self) -> Result<(), ToolSourceError> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": { "name": "adnify-mcp", "version": env!("CARGO_PKG_VERSION") }
        });
        let request = RequestMessage::new(INITIALIZE_REQUEST_ID, "initialize", params);
        let body = serde_json::to_vec(&request).map_err(|e| ToolSourceError::Transport(e.to_string()))?;
        let resp = self.post(body).await?;
        let status = resp.status();
        if let Some(id) = resp.headers().get("MCP-Session-Id").and_then(|v| v.to_str().ok()) {
            *self.session_id.lock().map_err(|e| ToolSourceError::Transport(e.to_string()))? =
                Some(id.to_string());
        }
        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ToolSourceError::Transport(format!(
                "initialize HTTP {status}: {}",
                if text.is_empty() { "no body" } else { &text }
            )));
        }
        let content_type = resp.headers().get("content-type").cloned();
        let text = resp
            .text()
            .await
            .map_err(|e| ToolSourceError::Transport(format!("initialize response body: {e}")))?;
        let _: JsonRpcResponse = parse_json_rpc_from_body(&text, content_type.as_ref())
            .map_err(|e| ToolSourceError::Transport(format!("initialize {e}")))?;
        self.notify_initialized().await
    }

    async fn notify_initialized(&self) -> Result<(), ToolSourceError> {
        let notification = NotificationMessage::new("notifications/initialized", Some(json!({})));
        let body =
            serde_json::to_vec(&notification).map_err(|e| ToolSourceError::Transport(e.to_string()))?;
        let resp = self.post(body).await?;
        let status = resp.status();
        if status != reqwest::StatusCode::ACCEPTED && !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ToolSourceError::Transport(format!(
                "notifications/initialized HTTP {status}: {}",
                if text.is_empty() { "no body" } else { &text }
            )));
        }
        Ok(())
    }

    async fn request(
        &self,
        id: &str,
        method: &str,
        params: Value,
    ) -> Result<ResultMessage, ToolSourceError> {
        let request = RequestMessage::new(id, method, params);
        let body = serde_json::to_vec(&request).map_err(|e| ToolSourceError::Transport(e.to_string()))?;
        let resp = self.post(body).await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ToolSourceError::Transport(format!(
                "{method} HTTP {status}: {}",
                if text.is_empty() { "no body" } else { &text }
            )));
        }
        let content_type = resp.headers().get("content-type").cloned();
        let text = resp.text().await.map_err(|e| ToolSourceError::Transport(e.to_string()))?;
        let parsed = parse_json_rpc_from_body(&text, content_type.as_ref())?;
        let msg_id = parsed.id.unwrap_or_else(|| MessageId::from(id));
        if let Some(err) = parsed.error {
            let err_obj = ErrorObject::new(err.code as i32, err.message, None);
            return Ok(ResultMessage::failure(msg_id, err_obj));
        }
        Ok(ResultMessage::success(msg_id, parsed.result.unwrap_or(Value::Null)))
    }
}

fn parse_list_tools_result(result: ResultMessage) -> Result<Vec<ToolSpec>, ToolSourceError> {
    if let Some(err) = result.error {
        return Err(ToolSourceError::JsonRpc(err.message));
    }
    let tools_value = result
        .result
        .and_then(|r| r.get("tools").cloned())
        .ok_or_else(|| ToolSourceError::Transport("no tools in response".into()))?;
    let tools_array =
        tools_value.as_array().ok_or_else(|| ToolSourceError::Transport("tools not an array".into()))?;
    let mut specs = Vec::with_capacity(tools_array.len());
    for t in tools_array {
        let obj = t
            .as_object()
            .ok_or_else(|| ToolSourceError::Transport("tool item not an object".into()))?;
        let name = obj.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let description = obj.get("description").and_then(|v| v.as_str()).map(String::from);
        let input_schema =
            obj.get("inputSchema").cloned().unwrap_or(Value::Object(serde_json::Map::new()));
        specs.push(ToolSpec { name, description, input_schema });
    }
    Ok(specs)
}

fn parse_call_tool_result(result: ResultMessage) -> Result<ToolCallContent, ToolSourceError> {
    if let Some(err) = result.error {
        return Err(ToolSourceError::JsonRpc(err.message));
    }
    let result_value = result
        .result
        .ok_or_else(|| ToolSourceError::Transport("no result in tools/call response".into()))?;
    if result_value.get("isError").and_then(|v| v.as_bool()).unwrap_or(false) {
        let msg = result_value
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|b| b.get("text").and_then(|t| t.as_str()))
            .unwrap_or("tool returned error")
            .to_string();
        return Err(ToolSourceError::Transport(msg));
    }
    let mut text_parts = Vec::new();
    if let Some(content_array) = result_value.get("content").and_then(|c| c.as_array()) {
        for block in content_array {
            if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text_parts.push(t);
                }
            }
        }
    }
    let mut text = text_parts.join("\n").trim().to_string();
    if text.is_empty() {
        if let Some(structured) = result_value.get("structuredContent") {
            text = serde_json::to_string(structured).unwrap_or_default();
        }
    }
    if text.is_empty() {
        return Err(ToolSourceError::Transport(
            "no text or structuredContent in tools/call response".into(),
        ));
    }
    Ok(ToolCallContent::text(text))
}

#[async_trait::async_trait]
impl ToolSource for McpToolSource {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError> {
        let result =
            self.request("adnify-tools-list", "tools/list", Value::Object(serde_json::Map::new())).await?;
        parse_list_tools_result(result)
    }

    async fn call_tool_with_context(
        &self,
        name: &str,
        arguments: Value,
        _ctx: Option<&super::ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        let id = format!("adnify-call-{name}");
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.request(&id, "tools/call", params).await?;
        parse_call_tool_result(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn read_http_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 1024];
        loop {
            let n = stream.read(&mut tmp).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let header_end = pos + 4;
                let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
                let content_length = headers
                    .lines()
                    .find_map(|line| {
                        let lower = line.to_ascii_lowercase();
                        lower.strip_prefix("content-length:").and_then(|v| v.trim().parse::<usize>().ok())
                    })
                    .unwrap_or(0);
                let mut body = buf[header_end..].to_vec();
                while body.len() < content_length {
                    let m = stream.read(&mut tmp).await.unwrap();
                    if m == 0 {
                        break;
                    }
                    body.extend_from_slice(&tmp[..m]);
                }
                return String::from_utf8_lossy(&body[..content_length]).to_string();
            }
        }
        String::new()
    }

    async fn write_http_response(stream: &mut TcpStream, status: &str, content_type: Option<&str>, body: &str) {
        let mut resp = format!("HTTP/1.1 {status}\r\nConnection: close\r\n");
        if let Some(ct) = content_type {
            resp.push_str(&format!("Content-Type: {ct}\r\n"));
        }
        resp.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
        stream.write_all(resp.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn list_and_call_round_trip_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            for _ in 0..4 {
                let (mut stream, _) = listener.accept().await.unwrap();
                let body = read_http_request(&mut stream).await;
                let json: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
                let method = json.get("method").and_then(|m| m.as_str()).unwrap_or("").to_string();
                match method.as_str() {
                    "initialize" => {
                        let body = json!({"jsonrpc":"2.0","id":"adnify-mcp-initialize","result":{"protocolVersion":"2025-11-25"}}).to_string();
                        write_http_response(&mut stream, "200 OK", Some("application/json"), &body).await;
                    }
                    "notifications/initialized" => {
                        write_http_response(&mut stream, "202 Accepted", None, "").await;
                    }
                    "tools/list" => {
                        let body = json!({"jsonrpc":"2.0","id":"adnify-tools-list","result":{"tools":[{"name":"http_tool","description":"from http","inputSchema":{"type":"object"}}]}}).to_string();
                        write_http_response(&mut stream, "200 OK", Some("application/json"), &body).await;
                    }
                    "tools/call" => {
                        let body = json!({"jsonrpc":"2.0","id":"adnify-call-http_tool","result":{"content":[{"type":"text","text":"ok-from-http"}]}}).to_string();
                        write_http_response(&mut stream, "200 OK", Some("application/json"), &body).await;
                    }
                    other => panic!("unexpected method: {other}"),
                }
            }
        });

        let source =
            McpToolSource::new_http(format!("http://{addr}"), [("X-Test", "1")]).await.unwrap();
        let tools = source.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "http_tool");
        let out = source.call_tool("http_tool", json!({"q":"x"})).await.unwrap();
        assert_eq!(out.text, "ok-from-http");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn maps_jsonrpc_error_from_tools_call() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            for _ in 0..2 {
                let (mut stream, _) = listener.accept().await.unwrap();
                let body = read_http_request(&mut stream).await;
                let json: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
                let method = json.get("method").and_then(|m| m.as_str()).unwrap_or("");
                match method {
                    "initialize" => {
                        write_http_response(&mut stream, "202 Accepted", None, "").await;
                    }
                    "tools/call" => {
                        let body = json!({"jsonrpc":"2.0","id":"adnify-call-bad_tool","error":{"code":-32000,"message":"call failed"}}).to_string();
                        write_http_response(&mut stream, "200 OK", Some("application/json"), &body).await;
                    }
                    other => panic!("unexpected method: {other}"),
                }
            }
        });

        let source = McpToolSource::new_http(format!("http://{addr}"), std::iter::empty::<(String, String)>())
            .await
            .unwrap();
        let err = source.call_tool("bad_tool", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolSourceError::JsonRpc(msg) if msg == "call failed"));
        server.await.unwrap();
    }

    #[test]
    fn parse_list_tools_result_errors_for_missing_or_invalid_tools() {
        let missing = ResultMessage::success(MessageId::from("1"), json!({}));
        assert!(matches!(parse_list_tools_result(missing), Err(ToolSourceError::Transport(_))));

        let non_array = ResultMessage::success(MessageId::from("1"), json!({"tools": {}}));
        assert!(matches!(parse_list_tools_result(non_array), Err(ToolSourceError::Transport(_))));
    }

    #[test]
    fn parse_call_tool_result_joins_text_blocks() {
        let result = ResultMessage::success(
            MessageId::from("1"),
            json!({"content": [{"type":"text","text":"line1"},{"type":"image","text":"ignored"},{"type":"text","text":"line2"}]}),
        );
        let out = parse_call_tool_result(result).unwrap();
        assert_eq!(out.text, "line1\nline2");
    }
}
