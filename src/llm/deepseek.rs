//! DeepSeek API 客户端（OpenAI 兼容格式）
//!
//! DeepSeek 提供与 OpenAI 完全兼容的 Chat Completions 接口（含 function calling）。
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat（支持工具调用）

use std::time::Duration;

use crate::llm::OpenAiClient;

/// DeepSeek API 常量
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

/// 创建 DeepSeek 客户端；model 未指定时使用 deepseek-chat，base_url 未指定时使用官方地址
pub fn create_deepseek_client(
    base_url: Option<&str>,
    model: Option<&str>,
    api_key: Option<String>,
    max_tokens: u32,
    request_timeout: Duration,
) -> OpenAiClient {
    OpenAiClient::new(
        Some(base_url.unwrap_or(DEEPSEEK_BASE_URL)),
        model.unwrap_or(DEEPSEEK_CHAT),
        api_key,
        max_tokens,
        request_timeout,
    )
    .with_api_key_env(DEEPSEEK_API_KEY_ENV)
}
