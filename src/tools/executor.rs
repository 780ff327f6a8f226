//! 工具调用器
//!
//! 持有 ToolEndpoint 与单次调用超时，invoke(request, catalog) 在超时内调用端点，
//! 所有失败（未知工具、执行错误、超时、断连）都转为 ok=false 的 ToolCallResult 反馈给模型，不向上抛出；
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::core::ChatError;
use crate::mcp::{CallToolResult, McpError, ToolEndpoint};
use crate::memory::{ToolCallRequest, ToolCallResult};
use crate::tools::ToolCatalog;

/// 工具原始结果归一化后的形态：取到文本内容，或退回整个结果的文本表示
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    TextContent(String),
    OpaqueContent(String),
}

impl ToolOutput {
    /// 优先取第一个带文本的内容项，否则序列化整个结果
    pub fn from_result(result: &CallToolResult) -> Self {
        match result.content.iter().find_map(|item| item.text.as_ref()) {
            Some(text) => ToolOutput::TextContent(text.clone()),
            None => ToolOutput::OpaqueContent(
                serde_json::to_string(result).unwrap_or_else(|_| format!("{:?}", result)),
            ),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ToolOutput::TextContent(s) | ToolOutput::OpaqueContent(s) => s,
        }
    }
}

/// 一次调用的结果；failure 保留失败的错误类型，供日志与编排层判断（如断连）
#[derive(Debug)]
pub struct Invocation {
    pub result: ToolCallResult,
    pub failure: Option<ChatError>,
}

impl Invocation {
    fn ok(id: &str, output: String) -> Self {
        Self {
            result: ToolCallResult::success(id, output),
            failure: None,
        }
    }

    fn failed(id: &str, output: String, err: ChatError) -> Self {
        Self {
            result: ToolCallResult::failure(id, output),
            failure: Some(err),
        }
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self.failure, Some(ChatError::ConnectionLost(_)))
    }
}

/// 工具调用器：对每次调用施加超时，并把一切失败折叠为失败标记的结果
pub struct ToolInvoker {
    endpoint: Arc<dyn ToolEndpoint>,
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(endpoint: Arc<dyn ToolEndpoint>, timeout_secs: u64) -> Self {
        Self::with_timeout(endpoint, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(endpoint: Arc<dyn ToolEndpoint>, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    /// 执行一个工具调用请求；不在目录中的工具不会访问端点
    pub async fn invoke(&self, request: &ToolCallRequest, catalog: &ToolCatalog) -> Invocation {
        let tool_name = request.tool_name.as_str();
        let start = Instant::now();

        let (invocation, outcome) = if !catalog.contains(tool_name) {
            (
                Invocation::failed(
                    &request.id,
                    format!("tool not found: {tool_name}"),
                    ChatError::ToolNotFound(tool_name.to_string()),
                ),
                "not_found",
            )
        } else {
            match timeout(
                self.timeout,
                self.endpoint.call_tool(tool_name, &request.arguments),
            )
            .await
            {
                Ok(Ok(result)) => {
                    let text = ToolOutput::from_result(&result).into_text();
                    if result.is_error {
                        (
                            Invocation::failed(
                                &request.id,
                                text.clone(),
                                ChatError::ToolExecutionError(text),
                            ),
                            "error",
                        )
                    } else {
                        (Invocation::ok(&request.id, text), "ok")
                    }
                }
                Ok(Err(McpError::Timeout(_))) => (
                    Invocation::failed(
                        &request.id,
                        format!("tool {tool_name} timed out waiting for the server"),
                        ChatError::ToolTimeout(tool_name.to_string()),
                    ),
                    "timeout",
                ),
                Ok(Err(e)) if e.is_disconnect() => (
                    Invocation::failed(
                        &request.id,
                        e.to_string(),
                        ChatError::ConnectionLost(e.to_string()),
                    ),
                    "disconnected",
                ),
                Ok(Err(e)) => (
                    Invocation::failed(
                        &request.id,
                        e.to_string(),
                        ChatError::ToolExecutionError(e.to_string()),
                    ),
                    "error",
                ),
                Err(_) => (
                    Invocation::failed(
                        &request.id,
                        format!(
                            "tool {tool_name} timed out after {}s",
                            self.timeout.as_secs_f64()
                        ),
                        ChatError::ToolTimeout(tool_name.to_string()),
                    ),
                    "timeout",
                ),
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "call_id": request.id,
            "ok": invocation.result.ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview(&request.arguments),
        });
        if invocation.result.ok {
            tracing::info!(target: "tool_audit", audit = %audit, "tool call");
        } else {
            tracing::warn!(target: "tool_audit", audit = %audit, "tool call");
        }

        invocation
    }
}

fn args_preview(args: &Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{ContentItem, MockBehavior, MockToolEndpoint, ToolDescriptor};
    use serde_json::json;

    fn catalog() -> ToolCatalog {
        ToolCatalog::new(vec![
            ToolDescriptor::new("clima_actual", "clima", json!({"type": "object"})),
            ToolDescriptor::new("lento", "slow", json!({"type": "object"})),
        ])
    }

    fn request(id: &str, tool: &str) -> ToolCallRequest {
        let args = json!({"city": "Granada"}).as_object().cloned().unwrap();
        ToolCallRequest::new(id, tool, args)
    }

    #[test]
    fn test_output_prefers_first_text_item() {
        let result = CallToolResult {
            content: vec![
                ContentItem {
                    kind: "image".to_string(),
                    text: None,
                    extra: Map::new(),
                },
                ContentItem::text("soleado"),
                ContentItem::text("ignored"),
            ],
            ..CallToolResult::default()
        };
        assert_eq!(
            ToolOutput::from_result(&result),
            ToolOutput::TextContent("soleado".to_string())
        );
    }

    #[test]
    fn test_output_falls_back_to_whole_result() {
        let result = CallToolResult::default();
        match ToolOutput::from_result(&result) {
            ToolOutput::OpaqueContent(s) => assert!(s.contains("content")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_never_reaches_endpoint() {
        let endpoint = Arc::new(MockToolEndpoint::new(vec![]));
        let invoker = ToolInvoker::new(endpoint.clone(), 5);
        let inv = invoker.invoke(&request("t9", "no_existe"), &catalog()).await;
        assert!(!inv.result.ok);
        assert_eq!(inv.result.id, "t9");
        assert_eq!(inv.result.output, "tool not found: no_existe");
        assert!(matches!(inv.failure, Some(ChatError::ToolNotFound(_))));
        assert_eq!(endpoint.call_count(), 0);
    }

    #[tokio::test]
    async fn test_success_passes_arguments() {
        let endpoint =
            Arc::new(MockToolEndpoint::new(vec![]).with_reply("clima_actual", "soleado"));
        let invoker = ToolInvoker::new(endpoint.clone(), 5);
        let inv = invoker.invoke(&request("t1", "clima_actual"), &catalog()).await;
        assert_eq!(inv.result, ToolCallResult::success("t1", "soleado"));
        assert_eq!(endpoint.calls()[0].1["city"], "Granada");
    }

    #[tokio::test]
    async fn test_execution_error_is_recovered() {
        let endpoint = Arc::new(
            MockToolEndpoint::new(vec![])
                .with_behavior("clima_actual", MockBehavior::Fail("api down".to_string())),
        );
        let invoker = ToolInvoker::new(endpoint, 5);
        let inv = invoker.invoke(&request("t1", "clima_actual"), &catalog()).await;
        assert!(!inv.result.ok);
        assert!(inv.result.output.contains("api down"));
        assert!(matches!(inv.failure, Some(ChatError::ToolExecutionError(_))));
    }

    #[tokio::test]
    async fn test_is_error_result_is_flagged() {
        let mut failed = CallToolResult::text("city unknown");
        failed.is_error = true;
        let endpoint = Arc::new(
            MockToolEndpoint::new(vec![]).with_behavior("clima_actual", MockBehavior::Reply(failed)),
        );
        let invoker = ToolInvoker::new(endpoint, 5);
        let inv = invoker.invoke(&request("t1", "clima_actual"), &catalog()).await;
        assert_eq!(inv.result, ToolCallResult::failure("t1", "city unknown"));
    }

    #[tokio::test]
    async fn test_timeout_is_recovered() {
        let endpoint = Arc::new(MockToolEndpoint::new(vec![]).with_behavior(
            "lento",
            MockBehavior::Delay(Duration::from_secs(5), CallToolResult::text("late")),
        ));
        let invoker = ToolInvoker::with_timeout(endpoint, Duration::from_millis(20));
        let inv = invoker.invoke(&request("t2", "lento"), &catalog()).await;
        assert!(!inv.result.ok);
        assert!(inv.result.output.contains("timed out"));
        assert!(matches!(inv.failure, Some(ChatError::ToolTimeout(_))));
    }

    #[tokio::test]
    async fn test_disconnect_is_flagged_as_connection_lost() {
        let endpoint = Arc::new(
            MockToolEndpoint::new(vec![]).with_behavior("clima_actual", MockBehavior::Disconnect),
        );
        let invoker = ToolInvoker::new(endpoint, 5);
        let inv = invoker.invoke(&request("t1", "clima_actual"), &catalog()).await;
        assert!(!inv.result.ok);
        assert!(inv.is_connection_lost());
    }

    #[tokio::test]
    async fn test_transport_timeout_is_reported_as_tool_timeout() {
        let endpoint = Arc::new(
            MockToolEndpoint::new(vec![])
                .with_behavior("clima_actual", MockBehavior::TransportTimeout),
        );
        let invoker = ToolInvoker::new(endpoint, 5);
        let inv = invoker.invoke(&request("t3", "clima_actual"), &catalog()).await;
        assert!(!inv.result.ok);
        assert!(inv.result.output.contains("timed out"));
        assert!(matches!(inv.failure, Some(ChatError::ToolTimeout(ref n)) if n == "clima_actual"));
        assert!(!inv.is_connection_lost());
    }
}
