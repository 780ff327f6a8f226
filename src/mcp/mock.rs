//! Mock 工具端点（用于测试，无需启动服务器子进程）
//!
//! 按工具名预置返回值、失败或延迟，并记录每次 tools/call 的名称与参数。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::mcp::{CallToolResult, McpError, ToolDescriptor, ToolEndpoint};

/// 单个工具的预置行为
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Reply(CallToolResult),
    Fail(String),
    Disconnect,
    /// 模拟传输层等待响应超时
    TransportTimeout,
    Delay(Duration, CallToolResult),
}

#[derive(Default)]
pub struct MockToolEndpoint {
    tools: Vec<ToolDescriptor>,
    behaviors: HashMap<String, MockBehavior>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
    call_count: AtomicUsize,
}

impl MockToolEndpoint {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            ..Self::default()
        }
    }

    pub fn with_behavior(mut self, tool: &str, behavior: MockBehavior) -> Self {
        self.behaviors.insert(tool.to_string(), behavior);
        self
    }

    /// 为工具预置文本回复
    pub fn with_reply(self, tool: &str, text: &str) -> Self {
        self.with_behavior(tool, MockBehavior::Reply(CallToolResult::text(text)))
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// 已发生的调用（工具名 + 参数），按调用顺序
    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

#[async_trait]
impl ToolEndpoint for MockToolEndpoint {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<CallToolResult, McpError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((name.to_string(), arguments.clone()));
        }
        match self.behaviors.get(name) {
            Some(MockBehavior::Reply(r)) => Ok(r.clone()),
            Some(MockBehavior::Fail(msg)) => Err(McpError::Rpc {
                code: -32603,
                message: msg.clone(),
            }),
            Some(MockBehavior::Disconnect) => Err(McpError::Closed),
            Some(MockBehavior::TransportTimeout) => Err(McpError::Timeout("tools/call".to_string())),
            Some(MockBehavior::Delay(d, r)) => {
                tokio::time::sleep(*d).await;
                Ok(r.clone())
            }
            None => Ok(CallToolResult::text(format!("{name} ok"))),
        }
    }
}
