//! JSON-RPC 2.0 framing and MCP payload types

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::registry::CapabilityKind;
use super::session::SessionId;
use crate::{Error, Result};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error codes. The -32000 range is server-defined.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const HANDLER_ERROR: i32 = -32000;
    pub const TIMEOUT: i32 = -32001;
    pub const NOT_FOUND: i32 = -32002;
    pub const NOT_SUPPORTED: i32 = -32003;
}

/// JSON-RPC request or notification
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC response; one outbound frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }

    /// Build a failure frame from a dispatch error, tagging it with its reason class
    pub fn failure(id: Option<Value>, err: &Error) -> Self {
        let reason = ErrorReason::of(err);
        let mut data = json!({ "reason": reason.as_str() });
        if let Error::Validation(v) = err {
            data["fields"] = serde_json::to_value(&v.fields).unwrap_or(Value::Null);
        }

        let mut resp = Self::error(id, reason.code(), &err.to_string());
        if let Some(e) = resp.error.as_mut() {
            e.data = Some(data);
        }
        resp
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Reason class carried in `error.data.reason`, if any
    pub fn reason(&self) -> Option<&str> {
        self.error
            .as_ref()
            .and_then(|e| e.data.as_ref())
            .and_then(|d| d.get("reason"))
            .and_then(|r| r.as_str())
    }
}

/// Error classes surfaced to clients in failure frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReason {
    NotFound,
    InvalidParams,
    NotSupported,
    HandlerError,
    Timeout,
    MethodNotFound,
    InvalidRequest,
    Internal,
}

impl ErrorReason {
    pub fn of(err: &Error) -> Self {
        match err {
            Error::NotFound { .. } => ErrorReason::NotFound,
            Error::Validation(_) => ErrorReason::InvalidParams,
            Error::NotSupported(_) => ErrorReason::NotSupported,
            Error::Handler(_) => ErrorReason::HandlerError,
            Error::Timeout(_) => ErrorReason::Timeout,
            Error::MethodNotFound(_) => ErrorReason::MethodNotFound,
            Error::InvalidRequest(_) => ErrorReason::InvalidRequest,
            _ => ErrorReason::Internal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::NotFound => "NotFound",
            ErrorReason::InvalidParams => "InvalidParams",
            ErrorReason::NotSupported => "NotSupported",
            ErrorReason::HandlerError => "HandlerError",
            ErrorReason::Timeout => "Timeout",
            ErrorReason::MethodNotFound => "MethodNotFound",
            ErrorReason::InvalidRequest => "InvalidRequest",
            ErrorReason::Internal => "Internal",
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ErrorReason::NotFound => codes::NOT_FOUND,
            ErrorReason::InvalidParams => codes::INVALID_PARAMS,
            ErrorReason::NotSupported => codes::NOT_SUPPORTED,
            ErrorReason::HandlerError => codes::HANDLER_ERROR,
            ErrorReason::Timeout => codes::TIMEOUT,
            ErrorReason::MethodNotFound => codes::METHOD_NOT_FOUND,
            ErrorReason::InvalidRequest => codes::INVALID_REQUEST,
            ErrorReason::Internal => codes::INTERNAL_ERROR,
        }
    }
}

// ============================================================================
// Inbound frames
// ============================================================================

/// What an inbound request asks the dispatcher to do
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Initialize,
    Ping,
    ListTools,
    /// Concrete resources of every listable template, or of one named template
    ListResources {
        template: Option<String>,
    },
    ListResourceTemplates,
    ListPrompts,
    /// Invoke a capability: a tool or prompt by name, a resource by URI
    Invoke {
        kind: CapabilityKind,
        target: String,
        arguments: Value,
    },
    Unknown(String),
}

/// One decoded client message, bound to the session it was posted to
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub session_id: SessionId,
    pub id: Option<Value>,
    pub method: String,
    pub params: Value,
}

impl InboundFrame {
    /// Notifications carry no id and never get a response
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Interpret the method and params
    pub fn call(&self) -> Result<Call> {
        if !(self.params.is_object() || self.params.is_null()) {
            return Err(Error::InvalidRequest("params must be an object".to_string()));
        }

        let call = match self.method.as_str() {
            "initialize" => Call::Initialize,
            "ping" => Call::Ping,
            "tools/list" => Call::ListTools,
            "resources/list" => Call::ListResources {
                template: self.optional_str("template")?,
            },
            "resources/templates/list" => Call::ListResourceTemplates,
            "prompts/list" => Call::ListPrompts,
            "tools/call" => Call::Invoke {
                kind: CapabilityKind::Tool,
                target: self.required_str("name")?,
                arguments: self.params.get("arguments").cloned().unwrap_or(Value::Null),
            },
            "prompts/get" => Call::Invoke {
                kind: CapabilityKind::Prompt,
                target: self.required_str("name")?,
                arguments: self.params.get("arguments").cloned().unwrap_or(Value::Null),
            },
            "resources/read" => Call::Invoke {
                kind: CapabilityKind::Resource,
                target: self.required_str("uri")?,
                arguments: Value::Null,
            },
            other => Call::Unknown(other.to_string()),
        };
        Ok(call)
    }

    fn optional_str(&self, field: &str) -> Result<Option<String>> {
        match self.params.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(crate::mcp::schema::ValidationError::single(field, "expected string").into()),
        }
    }

    fn required_str(&self, field: &str) -> Result<String> {
        self.params
            .get(field)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                crate::mcp::schema::ValidationError::single(field, "missing").into()
            })
    }
}

/// Decode a POST body into JSON-RPC messages. Accepts a single object or a
/// non-empty batch array; anything else is a decode error for the whole body.
pub fn decode_body(body: &[u8]) -> Result<Vec<JsonRpcRequest>> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| Error::Decode(format!("Invalid JSON: {}", e)))?;

    let items = match value {
        Value::Array(items) if items.is_empty() => {
            return Err(Error::Decode("Empty batch".to_string()))
        }
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => return Err(Error::Decode("Expected a JSON-RPC object or batch".to_string())),
    };

    items
        .into_iter()
        .map(|item| {
            let req: JsonRpcRequest = serde_json::from_value(item)
                .map_err(|e| Error::Decode(format!("Invalid JSON-RPC message: {}", e)))?;
            if req.jsonrpc != JSONRPC_VERSION {
                return Err(Error::Decode(format!(
                    "Unsupported jsonrpc version: {}",
                    req.jsonrpc
                )));
            }
            Ok(req)
        })
        .collect()
}

// ============================================================================
// Result payloads
// ============================================================================

/// A typed content item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceResult {
    pub contents: Vec<ResourceContents>,
}

/// A concrete resource returned by a template's list operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: Content,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}
