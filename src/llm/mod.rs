//! LLM 层：模型轮次生成器抽象与各后端实现（Anthropic / OpenAI 兼容 / OpenAI Responses / Mock）
//!
//! 后端以 ModelAdapter 标签枚举统一，按配置选择；每个后端只负责历史与原生消息格式的互转。

pub mod anthropic;
pub mod deepseek;
mod http;
pub mod mock;
pub mod openai;
pub mod responses;
pub mod traits;

use std::time::Duration;

use async_trait::async_trait;

pub use anthropic::AnthropicClient;
pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use responses::ResponsesClient;
pub use traits::{LlmClient, LlmError};

use crate::config::{AppConfig, Credentials, Provider};
use crate::memory::{ContentBlock, Turn};
use crate::tools::ToolCatalog;

/// 模型适配器：每个后端一个变体
pub enum ModelAdapter {
    Anthropic(AnthropicClient),
    ChatCompletions(OpenAiClient),
    Responses(ResponsesClient),
}

#[async_trait]
impl LlmClient for ModelAdapter {
    async fn generate(
        &self,
        history: &[Turn],
        catalog: &ToolCatalog,
    ) -> Result<Vec<ContentBlock>, LlmError> {
        match self {
            ModelAdapter::Anthropic(c) => c.generate(history, catalog).await,
            ModelAdapter::ChatCompletions(c) => c.generate(history, catalog).await,
            ModelAdapter::Responses(c) => c.generate(history, catalog).await,
        }
    }

    fn model(&self) -> &str {
        match self {
            ModelAdapter::Anthropic(c) => c.model(),
            ModelAdapter::ChatCompletions(c) => c.model(),
            ModelAdapter::Responses(c) => c.model(),
        }
    }
}

/// 根据配置与启动时读取的凭据创建模型适配器
pub fn create_llm_from_config(cfg: &AppConfig, credentials: &Credentials) -> ModelAdapter {
    let llm = &cfg.llm;
    let api_key = credentials.for_provider(llm.provider);
    let timeout = Duration::from_secs(llm.request_timeout_secs);
    let base_url = llm.base_url.as_deref();
    let model = llm.model.as_deref();

    let adapter = match llm.provider {
        Provider::Anthropic => ModelAdapter::Anthropic(AnthropicClient::new(
            base_url,
            model,
            api_key,
            llm.max_tokens,
            timeout,
        )),
        Provider::Openai => ModelAdapter::ChatCompletions(OpenAiClient::new(
            base_url,
            model.unwrap_or(openai::DEFAULT_OPENAI_MODEL),
            api_key,
            llm.max_tokens,
            timeout,
        )),
        Provider::OpenaiResponses => ModelAdapter::Responses(ResponsesClient::new(
            base_url,
            model,
            api_key,
            llm.max_tokens,
            timeout,
        )),
        Provider::Deepseek => ModelAdapter::ChatCompletions(create_deepseek_client(
            base_url,
            model,
            api_key,
            llm.max_tokens,
            timeout,
        )),
    };
    tracing::info!(provider = %llm.provider, model = %adapter.model(), "model adapter ready");
    adapter
}
