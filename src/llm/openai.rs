//! OpenAI 兼容 Chat Completions 客户端
//!
//! 可配置 base_url，支持 OpenAI、DeepSeek、自建代理等。
//! tool 轮逐条转为 role=tool 消息；工具参数在请求中编码为 JSON 字符串，响应中的字符串参数解码为对象。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::http::{build_http_client, decode_arguments, post_json};
use crate::llm::{LlmClient, LlmError};
use crate::memory::{ContentBlock, Role, ToolCallRequest, Turn};
use crate::tools::ToolCatalog;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1-nano";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
enum ChatMessage {
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ChatToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: ChatFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ChatFunctionCall {
    name: String,
    /// JSON 字符串
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ChatTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ChatFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    /// 部分兼容服务在纯文本回复中显式返回 null
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}

/// OpenAI 兼容客户端：持有 HTTP Client、base_url、模型名与 API Key
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: &'static str,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: Option<String>,
        max_tokens: u32,
        request_timeout: Duration,
    ) -> Self {
        Self {
            http: build_http_client(request_timeout),
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            api_key,
            api_key_env: OPENAI_API_KEY_ENV,
            max_tokens,
        }
    }

    /// 缺少 Key 时错误信息中提示的环境变量名
    pub fn with_api_key_env(mut self, env_var: &'static str) -> Self {
        self.api_key_env = env_var;
        self
    }

    fn to_openai_messages(history: &[Turn]) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        for turn in history {
            match turn.role {
                Role::User => messages.push(ChatMessage::User {
                    content: turn.text(),
                }),
                Role::Assistant => {
                    let text = turn.text();
                    let tool_calls: Vec<ChatToolCall> = turn
                        .tool_requests()
                        .map(|req| ChatToolCall {
                            id: req.id.clone(),
                            kind: function_kind(),
                            function: ChatFunctionCall {
                                name: req.tool_name.clone(),
                                arguments: Value::Object(req.arguments.clone()).to_string(),
                            },
                        })
                        .collect();
                    messages.push(ChatMessage::Assistant {
                        content: if text.is_empty() { None } else { Some(text) },
                        tool_calls,
                    });
                }
                Role::Tool => {
                    for block in &turn.blocks {
                        if let ContentBlock::ToolCallResult(res) = block {
                            messages.push(ChatMessage::Tool {
                                tool_call_id: res.id.clone(),
                                content: res.output.clone(),
                            });
                        }
                    }
                }
            }
        }
        messages
    }

    fn to_openai_tools(catalog: &ToolCatalog) -> Vec<ChatTool<'_>> {
        catalog
            .tools()
            .iter()
            .map(|t| ChatTool {
                kind: "function",
                function: ChatFunction {
                    name: &t.name,
                    description: t.description(),
                    parameters: &t.input_schema,
                },
            })
            .collect()
    }

    fn from_openai_response(response: ChatResponse) -> Result<Vec<ContentBlock>, LlmError> {
        let message = response
            .choices
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Decode("response has no choices".to_string()))?
            .message;

        let mut blocks = Vec::new();
        if let Some(text) = message.content.filter(|t| !t.is_empty()) {
            blocks.push(ContentBlock::text(text));
        }
        for call in message.tool_calls.unwrap_or_default() {
            let arguments = decode_arguments(&call.function.arguments)?;
            blocks.push(ContentBlock::ToolCallRequest(ToolCallRequest::new(
                call.id,
                call.function.name,
                arguments,
            )));
        }
        Ok(blocks)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate(
        &self,
        history: &[Turn],
        catalog: &ToolCatalog,
    ) -> Result<Vec<ContentBlock>, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey {
            env_var: self.api_key_env,
        })?;
        let request = ChatRequest {
            model: &self.model,
            messages: Self::to_openai_messages(history),
            tools: Self::to_openai_tools(catalog),
            max_tokens: self.max_tokens,
        };
        let builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key);
        let response: ChatResponse = post_json(builder, &request).await?;
        Self::from_openai_response(response)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
