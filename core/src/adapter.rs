//! Declarative LLM protocol adapter.
//!
//! A vendor's request/response shape is data — an [`AdapterSpec`] of field
//! paths and a body template — rather than a hand-written client per
//! provider. One generic streaming decoder walks those field paths against
//! every vendor's event stream and normalizes the result. Transport is
//! `reqwest` with `eventsource-stream` for SSE framing.

use std::time::Duration;

use base64::Engine as _;
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};

use crate::error::{AdapterErrorKind, AgentError};
use crate::message::{Image, Message};
use crate::tool_source::ToolSpec;

/// Whether an image's `data` is usable on the wire: a URL is passed through
/// as-is, while a base64 payload must actually decode — a malformed payload
/// here means the host captured it wrong, and silently shipping garbage
/// bytes to the provider only swaps a local error for a confusing 400.
fn image_data_is_valid(image: &Image) -> bool {
    image.is_url || base64::engine::general_purpose::STANDARD.decode(&image.data).is_ok()
}

/// Renders an image attachment as an OpenAI `image_url` content part.
fn openai_image_part(image: &Image) -> Option<Value> {
    if !image_data_is_valid(image) {
        return None;
    }
    let url = if image.is_url {
        image.data.clone()
    } else {
        let mime = image.media_type.as_deref().unwrap_or("image/png");
        format!("data:{mime};base64,{}", image.data)
    };
    Some(json!({"type": "image_url", "image_url": {"url": url}}))
}

/// Renders an image attachment as an Anthropic content block.
fn anthropic_image_part(image: &Image) -> Option<Value> {
    if !image_data_is_valid(image) {
        return None;
    }
    Some(if image.is_url {
        json!({"type": "image", "source": {"type": "url", "url": image.data}})
    } else {
        json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": image.media_type.as_deref().unwrap_or("image/png"),
                "data": image.data,
            },
        })
    })
}

/// Renders an image attachment as a Gemini `inline_data`/`file_data` part.
fn google_image_part(image: &Image) -> Option<Value> {
    if !image_data_is_valid(image) {
        return None;
    }
    Some(if image.is_url {
        json!({"file_data": {"file_uri": image.data}})
    } else {
        json!({
            "inline_data": {
                "mime_type": image.media_type.as_deref().unwrap_or("image/png"),
                "data": image.data,
            },
        })
    })
}

/// Which vendor convention a request/response follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolTag {
    OpenAi,
    Anthropic,
    Google,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoicePolicy {
    Auto,
    None,
    Required,
}

#[derive(Debug, Clone, Default)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub seed: Option<i64>,
    pub logit_bias: Option<Value>,
    pub max_output_tokens: Option<u32>,
    pub stop_sequences: Vec<String>,
}

/// Process-supplied configuration for one model. Never read from the
/// environment by this crate — the host supplies it.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub request_timeout: Duration,
    pub sampling: SamplingParams,
    pub streaming: bool,
    pub tool_choice: ToolChoicePolicy,
    pub parallel_tool_calls: bool,
    pub static_header_overrides: Vec<(String, String)>,
    pub protocol: ProtocolTag,
    pub reasoning_enabled: bool,
}

impl LlmConfig {
    /// Default request timeout: 120s, configurable per call site.
    pub fn default_timeout() -> Duration {
        Duration::from_secs(120)
    }
}

/// Dot-path (array indices as bare numbers) locations of the fields the
/// generic decoder needs out of one vendor delta event.
#[derive(Debug, Clone, Default)]
pub struct ResponseFieldPaths {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    /// Path to the array of tool-call fragments within one event.
    pub tool_calls_array: Option<String>,
    /// Paths below, relative to one element of `tool_calls_array`.
    pub tool_id: Option<String>,
    pub tool_name: Option<String>,
    pub tool_arguments: Option<String>,
    pub finish_reason: Option<String>,
    pub done_marker: Option<String>,
    /// Distinguishes vendors that stream arguments as already-parsed objects
    /// (Anthropic) from those that stream string fragments (OpenAI).
    pub args_is_object: bool,
    /// Event `type` values (the SSE `event:` line) that close the currently
    /// open tool call, e.g. Anthropic's `content_block_stop`.
    pub tool_call_end_event_types: Vec<String>,
    /// `finish_reason` values that imply the call is complete and any open
    /// tool call should be closed, e.g. `tool_calls`, `tool_use`, `stop`.
    pub finish_reasons_implying_completion: Vec<String>,
}

/// A fully declarative description of how to speak to one vendor.
#[derive(Debug, Clone)]
pub struct AdapterSpec {
    pub protocol: ProtocolTag,
    pub endpoint_path: String,
    pub static_headers: Vec<(String, String)>,
    /// JSON body template; leaf string values `"{{model}}"` / `"{{messages}}"`
    /// are substituted at request-synthesis time.
    pub body_template: Value,
    pub response: ResponseFieldPaths,
}

/// The normalized, vendor-independent shape of one streaming chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedDelta {
    Text(String),
    Reasoning(String),
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, args_fragment: String },
    ToolCallEnd { id: String },
    FinishReason(String),
    Error(String),
}

fn substitute_headers(headers: &[(String, String)], api_key: &str) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), v.replace("{{apiKey}}", api_key)))
        .collect()
}

/// Serializes the thread's messages into one vendor's wire shape. Unknown or
/// custom protocols fall through to the generic OpenAI-like shape, routed
/// entirely through `AdapterSpec` field paths.
fn translate_messages(protocol: ProtocolTag, messages: &[Message], system_prompt: Option<&str>) -> Value {
    match protocol {
        ProtocolTag::Anthropic => {
            let mut out = Vec::new();
            for m in messages {
                match m {
                    Message::User(u) => {
                        if u.images.is_empty() {
                            out.push(json!({"role": "user", "content": u.text}));
                        } else {
                            let mut content = vec![json!({"type": "text", "text": u.text})];
                            content.extend(u.images.iter().filter_map(anthropic_image_part));
                            out.push(json!({"role": "user", "content": content}));
                        }
                    }
                    Message::Assistant(a) => {
                        let mut content = Vec::new();
                        if !a.text.is_empty() {
                            content.push(json!({"type": "text", "text": a.text}));
                        }
                        for tc in &a.tool_calls {
                            content.push(json!({
                                "type": "tool_use",
                                "id": tc.id,
                                "name": tc.name,
                                "input": tc.arguments,
                            }));
                        }
                        out.push(json!({"role": "assistant", "content": content}));
                    }
                    Message::Tool(t) => out.push(json!({
                        "role": "user",
                        "content": [{"type": "tool_result", "tool_use_id": t.tool_call_id, "content": t.text}],
                    })),
                    Message::System(_) => {}
                }
            }
            json!(out)
        }
        ProtocolTag::Google => {
            let mut out = Vec::new();
            if let Some(sys) = system_prompt {
                out.push(json!({"role": "user", "parts": [{"text": sys}]}));
            }
            for m in messages {
                match m {
                    Message::User(u) => {
                        let mut parts = vec![json!({"text": u.text})];
                        parts.extend(u.images.iter().filter_map(google_image_part));
                        out.push(json!({"role": "user", "parts": parts}));
                    }
                    Message::Assistant(a) => {
                        let mut parts = Vec::new();
                        if !a.text.is_empty() {
                            parts.push(json!({"text": a.text}));
                        }
                        for tc in &a.tool_calls {
                            parts.push(json!({"functionCall": {"name": tc.name, "args": tc.arguments}}));
                        }
                        out.push(json!({"role": "model", "parts": parts}));
                    }
                    Message::Tool(t) => out.push(json!({
                        "role": "function",
                        "parts": [{"functionResponse": {"name": t.tool_call_id, "response": {"content": t.text}}}],
                    })),
                    Message::System(_) => {}
                }
            }
            json!(out)
        }
        // OpenAI and fully-declarative Custom both use the `tool_calls` convention.
        ProtocolTag::OpenAi | ProtocolTag::Custom => {
            let mut out = Vec::new();
            if let Some(sys) = system_prompt {
                out.push(json!({"role": "system", "content": sys}));
            }
            for m in messages {
                match m {
                    Message::User(u) => {
                        if u.images.is_empty() {
                            out.push(json!({"role": "user", "content": u.text}));
                        } else {
                            let mut content = vec![json!({"type": "text", "text": u.text})];
                            content.extend(u.images.iter().filter_map(openai_image_part));
                            out.push(json!({"role": "user", "content": content}));
                        }
                    }
                    Message::System(s) => out.push(json!({"role": "system", "content": s.text})),
                    Message::Assistant(a) => {
                        let tool_calls: Vec<Value> = a
                            .tool_calls
                            .iter()
                            .map(|tc| {
                                json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": serde_json::to_string(&tc.arguments).unwrap_or_default(),
                                    },
                                })
                            })
                            .collect();
                        let mut obj = json!({"role": "assistant", "content": a.text});
                        if !tool_calls.is_empty() {
                            obj["tool_calls"] = json!(tool_calls);
                        }
                        out.push(obj);
                    }
                    Message::Tool(t) => out.push(json!({
                        "role": "tool",
                        "tool_call_id": t.tool_call_id,
                        "content": t.text,
                    })),
                }
            }
            json!(out)
        }
    }
}

fn tools_to_json(protocol: ProtocolTag, tools: &[ToolSpec]) -> Value {
    match protocol {
        ProtocolTag::Anthropic => json!(tools
            .iter()
            .map(|t| json!({"name": t.name, "description": t.description, "input_schema": t.input_schema}))
            .collect::<Vec<_>>()),
        ProtocolTag::Google => json!(tools
            .iter()
            .map(|t| json!({"name": t.name, "description": t.description, "parameters": t.input_schema}))
            .collect::<Vec<_>>()),
        ProtocolTag::OpenAi | ProtocolTag::Custom => json!(tools
            .iter()
            .map(|t| json!({
                "type": "function",
                "function": {"name": t.name, "description": t.description, "parameters": t.input_schema},
            }))
            .collect::<Vec<_>>()),
    }
}

/// Deep-walks `template`, substituting the literal leaf strings
/// `"{{model}}"` and `"{{messages}}"`.
fn substitute_body(template: &Value, model: &str, messages: &Value) -> Value {
    match template {
        Value::String(s) if s == "{{model}}" => Value::String(model.to_string()),
        Value::String(s) if s == "{{messages}}" => messages.clone(),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), substitute_body(v, model, messages))).collect())
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| substitute_body(v, model, messages)).collect())
        }
        other => other.clone(),
    }
}

fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = value;
    for part in path.split('.') {
        cur = if let Ok(idx) = part.parse::<usize>() { cur.get(idx)? } else { cur.get(part)? };
    }
    Some(cur)
}

/// Tracks tool-call ids in first-appearance order so `ToolCallStart` is only
/// emitted once per id — id and name come from the first fragment
/// containing them.
#[derive(Default)]
struct DemuxState {
    active: Vec<String>,
}

/// Projects one decoded vendor JSON event through the response field paths
/// into zero or more [`NormalizedDelta`]s.
fn decode_event(event_type: Option<&str>, value: &Value, response: &ResponseFieldPaths, state: &mut DemuxState) -> Vec<NormalizedDelta> {
    let mut out = Vec::new();

    if let Some(path) = &response.content {
        if let Some(s) = get_path(value, path).and_then(Value::as_str) {
            if !s.is_empty() {
                out.push(NormalizedDelta::Text(s.to_string()));
            }
        }
    }
    if let Some(path) = &response.reasoning {
        if let Some(s) = get_path(value, path).and_then(Value::as_str) {
            if !s.is_empty() {
                out.push(NormalizedDelta::Reasoning(s.to_string()));
            }
        }
    }

    if let Some(path) = &response.tool_calls_array {
        if let Some(Value::Array(items)) = get_path(value, path) {
            for (idx, item) in items.iter().enumerate() {
                let id = response
                    .tool_id
                    .as_deref()
                    .and_then(|p| get_path(item, p))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| get_path(item, "index").and_then(Value::as_u64).map(|i| i.to_string()))
                    .unwrap_or_else(|| idx.to_string());

                let name = response
                    .tool_name
                    .as_deref()
                    .and_then(|p| get_path(item, p))
                    .and_then(Value::as_str)
                    .map(str::to_string);

                if !state.active.contains(&id) {
                    state.active.push(id.clone());
                    out.push(NormalizedDelta::ToolCallStart { id: id.clone(), name: name.unwrap_or_default() });
                }

                if let Some(path) = &response.tool_arguments {
                    if let Some(args) = get_path(item, path) {
                        let fragment = if response.args_is_object {
                            serde_json::to_string(args).unwrap_or_default()
                        } else {
                            args.as_str().unwrap_or_default().to_string()
                        };
                        if !fragment.is_empty() {
                            out.push(NormalizedDelta::ToolCallDelta { id: id.clone(), args_fragment: fragment });
                        }
                    }
                }
            }
        }
    }

    if let Some(event_type) = event_type {
        if response.tool_call_end_event_types.iter().any(|t| t == event_type) {
            if let Some(id) = state.active.last().cloned() {
                out.push(NormalizedDelta::ToolCallEnd { id });
            }
        }
    }

    if let Some(path) = &response.finish_reason {
        if let Some(reason) = get_path(value, path).and_then(Value::as_str) {
            if response.finish_reasons_implying_completion.iter().any(|r| r == reason) {
                for id in state.active.drain(..).collect::<Vec<_>>() {
                    out.push(NormalizedDelta::ToolCallEnd { id });
                }
            }
            out.push(NormalizedDelta::FinishReason(reason.to_string()));
        }
    }

    out
}

fn classify_status(status: reqwest::StatusCode) -> AdapterErrorKind {
    match status.as_u16() {
        401 | 403 => AdapterErrorKind::InvalidApiKey,
        404 => AdapterErrorKind::ModelNotFound,
        408 => AdapterErrorKind::Timeout,
        429 => AdapterErrorKind::RateLimit,
        402 => AdapterErrorKind::Quota,
        400 | 422 => AdapterErrorKind::InvalidRequest,
        s if (500..600).contains(&s) => AdapterErrorKind::Network,
        _ => AdapterErrorKind::Unknown,
    }
}

/// Performs one streaming HTTP request against a vendor and yields a
/// sequence of [`NormalizedDelta`]s.
pub struct LlmAdapter {
    client: reqwest::Client,
}

impl Default for LlmAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmAdapter {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    /// Streams one LLM call. Cancelling `cancel` closes the stream and
    /// yields one final `Error("cancelled")` delta.
    pub async fn stream(
        &self,
        spec: &AdapterSpec,
        config: &LlmConfig,
        messages: &[Message],
        system_prompt: Option<&str>,
        tools: &[ToolSpec],
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<impl Stream<Item = NormalizedDelta> + Send, AgentError> {
        let wire_messages = translate_messages(spec.protocol, messages, system_prompt);
        let mut body = substitute_body(&spec.body_template, &config.model, &wire_messages);
        if !tools.is_empty() {
            if let Value::Object(map) = &mut body {
                map.insert("tools".to_string(), tools_to_json(spec.protocol, tools));
            }
        }

        let url = format!("{}{}", config.base_url.trim_end_matches('/'), spec.endpoint_path);
        let mut req = self.client.post(&url).json(&body);
        for (k, v) in substitute_headers(&spec.static_headers, &config.api_key) {
            req = req.header(k, v);
        }
        for (k, v) in substitute_headers(&config.static_header_overrides, &config.api_key) {
            req = req.header(k, v);
        }
        if config.streaming {
            req = req.header("Accept", "text/event-stream");
        }

        let timeout = config.request_timeout;
        let send_fut = req.send();

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(stream::iter(vec![NormalizedDelta::Error("cancelled".to_string())]).boxed());
            }
            result = tokio::time::timeout(timeout, send_fut) => {
                match result {
                    Err(_) => return Ok(stream::iter(vec![NormalizedDelta::Error("timeout".to_string())]).boxed()),
                    Ok(Err(e)) => {
                        let kind = if e.is_timeout() { AdapterErrorKind::Timeout } else { AdapterErrorKind::Network };
                        return Err(AgentError::Llm { kind, message: e.to_string() });
                    }
                    Ok(Ok(resp)) => resp,
                }
            }
        };

        if !response.status().is_success() {
            let kind = classify_status(response.status());
            let body_text = response.text().await.unwrap_or_default();
            return Err(AgentError::Llm { kind, message: body_text });
        }

        use eventsource_stream::Eventsource;
        let byte_stream = response.bytes_stream();
        let sse = byte_stream.eventsource();

        let response_spec = spec.response.clone();
        let done_marker = response_spec.done_marker.clone();

        let deltas = sse
            .take_until(async move { cancel.cancelled().await })
            .scan(DemuxState::default(), move |state, event| {
                let event = match event {
                    Ok(e) => e,
                    Err(e) => return futures::future::ready(Some(vec![NormalizedDelta::Error(e.to_string())])),
                };
                if let Some(marker) = &done_marker {
                    if event.data.trim() == marker {
                        return futures::future::ready(Some(Vec::new()));
                    }
                }
                let value: Value = match serde_json::from_str(&event.data) {
                    Ok(v) => v,
                    Err(_) => return futures::future::ready(Some(Vec::new())),
                };
                let event_type = if event.event.is_empty() { None } else { Some(event.event.as_str()) };
                futures::future::ready(Some(decode_event(event_type, &value, &response_spec, state)))
            })
            .flat_map(stream::iter);

        Ok(deltas.boxed())
    }
}

/// Built-in OpenAI-compatible adapter spec.
pub fn openai_spec() -> AdapterSpec {
    AdapterSpec {
        protocol: ProtocolTag::OpenAi,
        endpoint_path: "/v1/chat/completions".to_string(),
        static_headers: vec![
            ("Authorization".to_string(), "Bearer {{apiKey}}".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ],
        body_template: json!({"model": "{{model}}", "messages": "{{messages}}", "stream": true}),
        response: ResponseFieldPaths {
            content: Some("choices.0.delta.content".to_string()),
            reasoning: Some("choices.0.delta.reasoning_content".to_string()),
            tool_calls_array: Some("choices.0.delta.tool_calls".to_string()),
            tool_id: Some("id".to_string()),
            tool_name: Some("function.name".to_string()),
            tool_arguments: Some("function.arguments".to_string()),
            finish_reason: Some("choices.0.finish_reason".to_string()),
            done_marker: Some("[DONE]".to_string()),
            args_is_object: false,
            tool_call_end_event_types: vec![],
            finish_reasons_implying_completion: vec!["tool_calls".to_string(), "stop".to_string()],
        },
    }
}

/// Built-in Anthropic adapter spec.
pub fn anthropic_spec() -> AdapterSpec {
    AdapterSpec {
        protocol: ProtocolTag::Anthropic,
        endpoint_path: "/v1/messages".to_string(),
        static_headers: vec![
            ("x-api-key".to_string(), "{{apiKey}}".to_string()),
            ("anthropic-version".to_string(), "2023-06-01".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ],
        body_template: json!({"model": "{{model}}", "messages": "{{messages}}", "stream": true, "max_tokens": 4096}),
        response: ResponseFieldPaths {
            content: Some("delta.text".to_string()),
            reasoning: Some("delta.thinking".to_string()),
            tool_calls_array: Some("content_block".to_string()),
            tool_id: Some("id".to_string()),
            tool_name: Some("name".to_string()),
            tool_arguments: Some("input".to_string()),
            finish_reason: Some("delta.stop_reason".to_string()),
            done_marker: None,
            args_is_object: true,
            tool_call_end_event_types: vec!["content_block_stop".to_string()],
            finish_reasons_implying_completion: vec!["tool_use".to_string(), "end_turn".to_string()],
        },
    }
}

/// Built-in Google (Gemini) adapter spec.
pub fn google_spec() -> AdapterSpec {
    AdapterSpec {
        protocol: ProtocolTag::Google,
        endpoint_path: "/v1beta/models/{{model}}:streamGenerateContent".to_string(),
        static_headers: vec![
            ("x-goog-api-key".to_string(), "{{apiKey}}".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ],
        body_template: json!({"contents": "{{messages}}"}),
        response: ResponseFieldPaths {
            content: Some("candidates.0.content.parts.0.text".to_string()),
            reasoning: None,
            tool_calls_array: Some("candidates.0.content.parts".to_string()),
            tool_id: None,
            tool_name: Some("functionCall.name".to_string()),
            tool_arguments: Some("functionCall.args".to_string()),
            finish_reason: Some("candidates.0.finishReason".to_string()),
            done_marker: None,
            args_is_object: true,
            tool_call_end_event_types: vec![],
            finish_reasons_implying_completion: vec!["STOP".to_string()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_body_replaces_model_and_messages_tokens() {
        let template = json!({"model": "{{model}}", "messages": "{{messages}}", "stream": true});
        let out = substitute_body(&template, "gpt-4o", &json!([{"role": "user", "content": "hi"}]));
        assert_eq!(out["model"], json!("gpt-4o"));
        assert_eq!(out["messages"][0]["content"], json!("hi"));
        assert_eq!(out["stream"], json!(true));
    }

    #[test]
    fn substitute_headers_replaces_api_key_token_only() {
        let headers = vec![("Authorization".to_string(), "Bearer {{apiKey}}".to_string())];
        let out = substitute_headers(&headers, "sk-test");
        assert_eq!(out[0].1, "Bearer sk-test");
    }

    #[test]
    fn get_path_traverses_object_and_array_indices() {
        let v = json!({"choices": [{"delta": {"content": "hi"}}]});
        assert_eq!(get_path(&v, "choices.0.delta.content").unwrap(), &json!("hi"));
        assert!(get_path(&v, "choices.5.delta.content").is_none());
    }

    /// Streaming tool-call fragments decode into ToolCallStart/Delta/End
    /// with ids preserving first-appearance order.
    #[test]
    fn decode_openai_style_tool_call_fragments_preserve_order() {
        let response = openai_spec().response;
        let mut state = DemuxState::default();

        let first = json!({"choices": [{"delta": {"tool_calls": [
            {"id": "t1", "function": {"name": "read_file", "arguments": "{\"path\":\"f"}}
        ]}}]});
        let deltas1 = decode_event(None, &first, &response, &mut state);
        assert!(matches!(&deltas1[0], NormalizedDelta::ToolCallStart { id, name } if id == "t1" && name == "read_file"));

        let second = json!({"choices": [{"delta": {"tool_calls": [
            {"id": "t1", "function": {"arguments": "oo.ts\"}"}}
        ]}}]});
        let deltas2 = decode_event(None, &second, &response, &mut state);
        assert!(matches!(&deltas2[0], NormalizedDelta::ToolCallDelta { id, args_fragment } if id == "t1" && args_fragment == "oo.ts\"}"));

        let finish = json!({"choices": [{"finish_reason": "tool_calls"}]});
        let deltas3 = decode_event(None, &finish, &response, &mut state);
        assert!(deltas3.iter().any(|d| matches!(d, NormalizedDelta::ToolCallEnd { id } if id == "t1")));
        assert!(deltas3.iter().any(|d| matches!(d, NormalizedDelta::FinishReason(r) if r == "tool_calls")));
    }

    #[test]
    fn anthropic_args_is_object_mode_serializes_whole_value_per_fragment() {
        let response = anthropic_spec().response;
        let mut state = DemuxState::default();
        let event = json!({"content_block": [{"id": "t1", "name": "read_file", "input": {"path": "foo.ts"}}]});
        let deltas = decode_event(None, &event, &response, &mut state);
        assert!(deltas.iter().any(|d| matches!(d, NormalizedDelta::ToolCallDelta{id, args_fragment} if id == "t1" && args_fragment.contains("foo.ts"))));
    }

    #[test]
    fn tool_call_end_event_type_closes_the_active_call() {
        let response = anthropic_spec().response;
        let mut state = DemuxState { active: vec!["t1".to_string()] };
        let deltas = decode_event(Some("content_block_stop"), &json!({}), &response, &mut state);
        assert!(matches!(&deltas[0], NormalizedDelta::ToolCallEnd { id } if id == "t1"));
    }

    #[test]
    fn openai_user_message_with_image_becomes_content_array() {
        let u = crate::message::Message::user("what is this?");
        let crate::message::Message::User(mut u) = u else { unreachable!() };
        u.images.push(Image { data: "aGVsbG8=".to_string(), is_url: false, media_type: Some("image/png".to_string()) });
        let messages = vec![Message::User(u)];
        let out = translate_messages(ProtocolTag::OpenAi, &messages, None);
        assert_eq!(out[0]["content"][0]["text"], json!("what is this?"));
        assert!(out[0]["content"][1]["image_url"]["url"].as_str().unwrap().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn anthropic_image_url_attachment_uses_url_source() {
        let image = Image { data: "https://example.com/a.png".to_string(), is_url: true, media_type: None };
        let part = anthropic_image_part(&image).unwrap();
        assert_eq!(part["source"]["type"], json!("url"));
        assert_eq!(part["source"]["url"], json!("https://example.com/a.png"));
    }

    #[test]
    fn google_inline_image_uses_mime_and_base64_data() {
        let image = Image { data: "aGVsbG8=".to_string(), is_url: false, media_type: Some("image/jpeg".to_string()) };
        let part = google_image_part(&image).unwrap();
        assert_eq!(part["inline_data"]["mime_type"], json!("image/jpeg"));
        assert_eq!(part["inline_data"]["data"], json!("aGVsbG8="));
    }

    #[test]
    fn malformed_base64_image_is_dropped_rather_than_sent() {
        let image = Image { data: "not valid base64!!".to_string(), is_url: false, media_type: None };
        assert!(openai_image_part(&image).is_none());
        assert!(anthropic_image_part(&image).is_none());
        assert!(google_image_part(&image).is_none());
    }

    #[test]
    fn classify_status_maps_http_codes_to_adapter_error_kinds() {
        assert_eq!(classify_status(reqwest::StatusCode::UNAUTHORIZED), AdapterErrorKind::InvalidApiKey);
        assert_eq!(classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS), AdapterErrorKind::RateLimit);
        assert_eq!(classify_status(reqwest::StatusCode::NOT_FOUND), AdapterErrorKind::ModelNotFound);
    }

    #[test]
    fn translate_messages_openai_serializes_tool_calls_convention() {
        let mut am = crate::message::AssistantMessage::new_streaming();
        am.text = "ok".to_string();
        am.tool_calls.push(crate::message::ToolCall::new_streaming("t1", "read_file"));
        let messages = vec![Message::Assistant(am)];
        let out = translate_messages(ProtocolTag::OpenAi, &messages, None);
        assert_eq!(out[0]["tool_calls"][0]["function"]["name"], json!("read_file"));
    }
}
