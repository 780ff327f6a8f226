//! MCP 协议消息：JSON-RPC 2.0 信封与 initialize / tools/list / tools/call 的载荷
//!
//! stdio 传输下每条消息占一行 JSON。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::mcp::McpError;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// JSON-RPC「方法不存在」错误码，用于回绝服务器发来的请求
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JsonRpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> JsonRpcNotification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// 从服务器读到的一条消息
#[derive(Debug)]
pub enum IncomingMessage {
    /// 对客户端请求的响应
    Response {
        id: u64,
        outcome: Result<Value, RpcError>,
    },
    /// 服务器主动发起的请求（本客户端不支持任何方法）
    Request { id: Value, method: String },
    Notification { method: String },
}

/// 解析一行 JSON-RPC 消息
pub fn parse_incoming(line: &str) -> Result<IncomingMessage, McpError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| McpError::Protocol(format!("{e}: {line}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| McpError::Protocol(format!("message is not an object: {line}")))?;

    let method = obj.get("method").and_then(Value::as_str);
    let id = obj.get("id").filter(|v| !v.is_null());

    match (method, id) {
        (Some(method), Some(id)) => Ok(IncomingMessage::Request {
            id: id.clone(),
            method: method.to_string(),
        }),
        (Some(method), None) => Ok(IncomingMessage::Notification {
            method: method.to_string(),
        }),
        (None, Some(id)) => {
            let id = id
                .as_u64()
                .ok_or_else(|| McpError::Protocol(format!("non-numeric response id: {id}")))?;
            let outcome = match obj.get("error") {
                Some(err) => Err(serde_json::from_value::<RpcError>(err.clone())
                    .map_err(|e| McpError::Protocol(format!("bad error object: {e}")))?),
                None => Ok(obj.get("result").cloned().unwrap_or(Value::Null)),
            };
            Ok(IncomingMessage::Response { id, outcome })
        }
        (None, None) => Err(McpError::Protocol(format!("unrecognized message: {line}"))),
    }
}

/// 服务器在 initialize 中声明的信息（只取用得到的字段）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

pub fn initialize_params(client_name: &str, client_version: &str) -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": client_name,
            "version": client_version,
        }
    })
}

/// 工具描述：名称唯一，连接期间不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
        }
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// tools/call 结果中的单个内容项；只有 text 类型携带文本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            ..Self::default()
        }
    }
}

pub fn call_tool_params(name: &str, arguments: &Map<String, Value>) -> Value {
    serde_json::json!({
        "name": name,
        "arguments": arguments,
    })
}
