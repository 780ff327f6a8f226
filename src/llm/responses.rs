//! OpenAI Responses API 客户端
//!
//! 输入为 item 列表：user / assistant 文本消息、function_call、function_call_output；
//! 输出中的 function_call.arguments 是 JSON 字符串，需解码后再构造 ToolCallRequest。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::http::{build_http_client, decode_arguments, post_json};
use crate::llm::openai::{DEFAULT_OPENAI_MODEL, OPENAI_API_KEY_ENV, OPENAI_BASE_URL};
use crate::llm::{LlmClient, LlmError};
use crate::memory::{ContentBlock, Role, ToolCallRequest, Turn};
use crate::tools::ToolCatalog;

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionTool<'a>>,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(untagged)]
enum InputItem {
    Message {
        role: &'static str,
        content: String,
    },
    Typed(TypedItem),
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TypedItem {
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Serialize)]
struct FunctionTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output: Option<Vec<OutputItem>>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<Vec<OutputContent>>,
    text: Option<String>,
    call_id: Option<String>,
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

/// Responses API 客户端
pub struct ResponsesClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl ResponsesClient {
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
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or(DEFAULT_OPENAI_MODEL).to_string(),
            api_key,
            max_tokens,
        }
    }

    fn to_input_items(history: &[Turn]) -> Vec<InputItem> {
        let mut items = Vec::new();
        for turn in history {
            match turn.role {
                Role::User => items.push(InputItem::Message {
                    role: "user",
                    content: turn.text(),
                }),
                Role::Assistant | Role::Tool => {
                    for block in &turn.blocks {
                        match block {
                            ContentBlock::Text { value } if !value.is_empty() => {
                                items.push(InputItem::Message {
                                    role: "assistant",
                                    content: value.clone(),
                                })
                            }
                            ContentBlock::Text { .. } => {}
                            ContentBlock::ToolCallRequest(req) => {
                                items.push(InputItem::Typed(TypedItem::FunctionCall {
                                    call_id: req.id.clone(),
                                    name: req.tool_name.clone(),
                                    arguments: Value::Object(req.arguments.clone()).to_string(),
                                }))
                            }
                            ContentBlock::ToolCallResult(res) => {
                                items.push(InputItem::Typed(TypedItem::FunctionCallOutput {
                                    call_id: res.id.clone(),
                                    output: res.output.clone(),
                                }))
                            }
                        }
                    }
                }
            }
        }
        items
    }

    fn to_function_tools(catalog: &ToolCatalog) -> Vec<FunctionTool<'_>> {
        catalog
            .tools()
            .iter()
            .map(|t| FunctionTool {
                kind: "function",
                name: &t.name,
                description: t.description(),
                parameters: &t.input_schema,
            })
            .collect()
    }

    fn from_output(response: ResponsesResponse) -> Result<Vec<ContentBlock>, LlmError> {
        let mut blocks = Vec::new();
        for item in response.output.unwrap_or_default() {
            match item.kind.as_str() {
                "message" => {
                    for part in item.content.unwrap_or_default() {
                        if part.kind == "output_text" {
                            blocks.push(ContentBlock::text(part.text.unwrap_or_default()));
                        }
                    }
                }
                "output_text" => blocks.push(ContentBlock::text(item.text.unwrap_or_default())),
                "function_call" => {
                    let call_id = item.call_id.ok_or_else(|| {
                        LlmError::Decode("function_call item without call_id".to_string())
                    })?;
                    let name = item.name.ok_or_else(|| {
                        LlmError::Decode("function_call item without name".to_string())
                    })?;
                    let arguments = decode_arguments(item.arguments.as_deref().unwrap_or(""))?;
                    blocks.push(ContentBlock::ToolCallRequest(ToolCallRequest::new(
                        call_id, name, arguments,
                    )));
                }
                other => tracing::debug!(kind = %other, "ignoring responses output item"),
            }
        }
        Ok(blocks)
    }
}

#[async_trait]
impl LlmClient for ResponsesClient {
    async fn generate(
        &self,
        history: &[Turn],
        catalog: &ToolCatalog,
    ) -> Result<Vec<ContentBlock>, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey {
            env_var: OPENAI_API_KEY_ENV,
        })?;
        let request = ResponsesRequest {
            model: &self.model,
            input: Self::to_input_items(history),
            tools: Self::to_function_tools(catalog),
            max_output_tokens: self.max_tokens,
        };
        let builder = self
            .http
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(api_key);
        let response: ResponsesResponse = post_json(builder, &request).await?;
        Self::from_output(response)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
