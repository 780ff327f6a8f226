//! LLM 客户端抽象
//!
//! 所有后端（Anthropic / OpenAI 兼容 / OpenAI Responses / Mock）实现 LlmClient：
//! 给定完整对话历史与工具目录，返回模型本轮按顺序输出的内容块。实现不持有对话状态。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::{ContentBlock, Turn};
use crate::tools::ToolCatalog;

/// 模型调用失败（传输、鉴权、限流、响应解码）
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("missing API key: set {env_var}")]
    MissingApiKey { env_var: &'static str },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("API returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("failed to decode model response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

/// 模型轮次生成器
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 生成一轮 assistant 输出；返回的块保持模型输出顺序
    async fn generate(
        &self,
        history: &[Turn],
        catalog: &ToolCatalog,
    ) -> Result<Vec<ContentBlock>, LlmError>;

    /// 当前使用的模型名（日志用）
    fn model(&self) -> &str {
        "unknown"
    }
}
