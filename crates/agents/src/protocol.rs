//! Wire frames for the two remote protocols: the A2A-style `sendMessage`
//! exchange workers and the reviewer speak, and the JSON-RPC tool calls the
//! registry speaks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Worker / reviewer transport ---

/// Outbound frame wrapping a user message for an agent endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub id: String,
    pub method: String,
    pub params: MessageParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageParams {
    pub message: AgentMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub role: String,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePart {
    pub text: String,
}

impl SendMessageRequest {
    /// Frame a user-text payload with a fresh message id.
    pub fn user_text(text: impl Into<String>) -> Self {
        let message_id = Uuid::new_v4().to_string();
        Self {
            id: message_id.clone(),
            method: "sendMessage".to_string(),
            params: MessageParams {
                message: AgentMessage {
                    message_id,
                    role: "user".to_string(),
                    parts: vec![MessagePart { text: text.into() }],
                },
            },
        }
    }
}

/// Extract the reply text from an agent response body.
///
/// Prefers the first text part of `result.message.parts`, then
/// `result.text`, and finally the whole body stringified. The reply is
/// fence-stripped in all cases.
pub fn extract_reply(body: &serde_json::Value) -> String {
    if let Some(result) = body.get("result") {
        if let Some(text) = result
            .pointer("/message/parts/0/text")
            .and_then(|v| v.as_str())
        {
            return strip_fence(text);
        }
        if let Some(text) = result.get("text").and_then(|v| v.as_str()) {
            return strip_fence(text);
        }
    }
    strip_fence(&body.to_string())
}

/// Strip one leading ```json fence and one trailing ``` fence.
pub fn strip_fence(text: &str) -> String {
    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    cleaned.trim().to_string()
}

// --- Registry transport (JSON-RPC 2.0 tool calls) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Frame a `tools/call` invocation of a registry tool.
    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: serde_json::Value::String(Uuid::new_v4().to_string()),
            method: "tools/call".to_string(),
            params: Some(serde_json::json!({
                "name": name,
                "arguments": arguments,
            })),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Result payload of a registry tool call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn first_text(&self) -> Option<&str> {
        self.content.first().map(|c| c.text.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type", default = "default_content_type")]
    pub content_type: String,
    pub text: String,
}

fn default_content_type() -> String {
    "text".to_string()
}
