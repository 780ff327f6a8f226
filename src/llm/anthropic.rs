//! Anthropic Messages API 客户端
//!
//! 历史转换规则：user 轮为文本；assistant 轮为 text + tool_use 块；
//! 连续的 tool 轮合并为一条 user 消息中的多个 tool_result 块（API 要求同一回复的工具结果放在一起）。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::http::{build_http_client, object_arguments, post_json};
use crate::llm::{LlmClient, LlmError};
use crate::memory::{ContentBlock, Role, ToolCallRequest, Turn};
use crate::tools::ToolCatalog;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Serialize)]
struct Request<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool<'a>>,
}

#[derive(Debug, Serialize, PartialEq)]
struct Message {
    role: &'static str,
    content: Vec<RequestBlock>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct Tool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    content: Option<Vec<ResponseBlock>>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
    id: Option<String>,
    name: Option<String>,
    input: Option<Value>,
}

/// Anthropic 客户端：持有 HTTP Client、模型名与启动时读取的 API Key
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(
        base_url: Option<&str>,
        model: Option<&str>,
        api_key: Option<String>,
        max_tokens: u32,
        request_timeout: Duration,
    ) -> Self {
        Self {
            http: build_http_client(request_timeout),
            base_url: base_url
                .unwrap_or(ANTHROPIC_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or(DEFAULT_ANTHROPIC_MODEL).to_string(),
            api_key,
            max_tokens,
        }
    }

    fn to_anthropic_messages(history: &[Turn]) -> Vec<Message> {
        let mut messages: Vec<Message> = Vec::new();
        for turn in history {
            let role = match turn.role {
                Role::Assistant => "assistant",
                Role::User | Role::Tool => "user",
            };
            let blocks: Vec<RequestBlock> = turn
                .blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { value } if value.is_empty() => None,
                    ContentBlock::Text { value } => Some(RequestBlock::Text {
                        text: value.clone(),
                    }),
                    ContentBlock::ToolCallRequest(req) => Some(RequestBlock::ToolUse {
                        id: req.id.clone(),
                        name: req.tool_name.clone(),
                        input: Value::Object(req.arguments.clone()),
                    }),
                    ContentBlock::ToolCallResult(res) => Some(RequestBlock::ToolResult {
                        tool_use_id: res.id.clone(),
                        content: res.output.clone(),
                        is_error: !res.ok,
                    }),
                })
                .collect();
            if blocks.is_empty() {
                continue;
            }
            // 同角色相邻消息合并（tool 结果 + 紧随其后的 user 文本都归入同一条 user 消息）
            match messages.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => messages.push(Message {
                    role,
                    content: blocks,
                }),
            }
        }
        messages
    }

    fn to_anthropic_tools(catalog: &ToolCatalog) -> Vec<Tool<'_>> {
        catalog
            .tools()
            .iter()
            .map(|t| Tool {
                name: &t.name,
                description: t.description(),
                input_schema: &t.input_schema,
            })
            .collect()
    }

    fn from_anthropic_response(response: Response) -> Result<Vec<ContentBlock>, LlmError> {
        let content = response.content.unwrap_or_default();
        let mut blocks = Vec::with_capacity(content.len());
        for item in content {
            match item.kind.as_str() {
                "text" => blocks.push(ContentBlock::text(item.text.unwrap_or_default())),
                "tool_use" => {
                    let id = item
                        .id
                        .ok_or_else(|| LlmError::Decode("tool_use block without id".into()))?;
                    let name = item
                        .name
                        .ok_or_else(|| LlmError::Decode("tool_use block without name".into()))?;
                    let arguments = object_arguments(item.input.unwrap_or(Value::Null))?;
                    blocks.push(ContentBlock::ToolCallRequest(ToolCallRequest::new(
                        id, name, arguments,
                    )));
                }
                other => tracing::debug!(kind = %other, "ignoring anthropic content block"),
            }
        }
        Ok(blocks)
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn generate(
        &self,
        history: &[Turn],
        catalog: &ToolCatalog,
    ) -> Result<Vec<ContentBlock>, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey {
            env_var: ANTHROPIC_API_KEY_ENV,
        })?;
        let request = Request {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: Self::to_anthropic_messages(history),
            tools: Self::to_anthropic_tools(catalog),
        };
        let builder = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        let response: Response = post_json(builder, &request).await?;
        Self::from_anthropic_response(response)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::ToolDescriptor;
    use crate::memory::ToolCallResult;
    use serde_json::{json, Map};

    fn weather_call(id: &str) -> ContentBlock {
        let args = json!({"state": "CA"}).as_object().cloned().unwrap();
        ContentBlock::ToolCallRequest(ToolCallRequest::new(id, "get_alerts", args))
    }

    #[test]
    fn test_tool_turns_are_grouped_into_one_user_message() {
        let history = vec![
            Turn::user("alerts?"),
            Turn::assistant(vec![ContentBlock::text("checking"), weather_call("a"), weather_call("b")]),
            Turn::tool(ToolCallResult::success("a", "none")),
            Turn::tool(ToolCallResult::failure("b", "boom")),
        ];
        let messages = AnthropicClient::to_anthropic_messages(&history);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[1].content.len(), 3);
        assert_eq!(messages[2].role, "user");
        assert_eq!(
            messages[2].content,
            vec![
                RequestBlock::ToolResult {
                    tool_use_id: "a".into(),
                    content: "none".into(),
                    is_error: false
                },
                RequestBlock::ToolResult {
                    tool_use_id: "b".into(),
                    content: "boom".into(),
                    is_error: true
                },
            ]
        );
    }

    #[test]
    fn test_request_serialization() {
        let catalog = ToolCatalog::new(vec![ToolDescriptor::new(
            "get_alerts",
            "Weather alerts",
            json!({"type": "object", "properties": {"state": {"type": "string"}}}),
        )]);
        let history = vec![Turn::user("hola")];
        let request = Request {
            model: DEFAULT_ANTHROPIC_MODEL,
            max_tokens: 1000,
            messages: AnthropicClient::to_anthropic_messages(&history),
            tools: AnthropicClient::to_anthropic_tools(&catalog),
        };
        let v = serde_json::to_value(&request).unwrap();
        assert_eq!(v["messages"][0]["content"][0]["type"], "text");
        assert_eq!(v["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(v["tools"][0]["name"], "get_alerts");
    }

    #[test]
    fn test_response_decoding_preserves_order() {
        let response: Response = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_alerts", "input": {"state": "CA"}},
                {"type": "tool_use", "id": "toolu_2", "name": "get_forecast", "input": {}}
            ]
        }))
        .unwrap();
        let blocks = AnthropicClient::from_anthropic_response(response).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], ContentBlock::text("Let me check."));
        match &blocks[2] {
            ContentBlock::ToolCallRequest(r) => {
                assert_eq!(r.id, "toolu_2");
                assert_eq!(r.arguments, Map::new());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_key_fails_on_first_call() {
        let client = AnthropicClient::new(None, None, None, 1000, Duration::from_secs(1));
        let err = client
            .generate(&[Turn::user("hola")], &ToolCatalog::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey { env_var } if env_var == ANTHROPIC_API_KEY_ENV));
    }
}
