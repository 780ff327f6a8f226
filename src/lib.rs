//! mcp-chat - MCP 工具客户端
//!
//! 把一次用户提问交给 LLM，由 LLM 决定调用 MCP 工具服务器上的哪些工具，
//! 循环往返直到得到最终回答（或达到工具轮数上限）。
//!
//! 模块划分：
//! - **agent**: 会话级运行时（连接服务器、拉取目录、逐次处理提问）
//! - **config**: 应用配置加载（TOML + 环境变量）与启动时读取的凭据
//! - **core**: 错误类型与恢复策略
//! - **llm**: 模型适配器（Anthropic / OpenAI Chat Completions / OpenAI Responses / DeepSeek / Mock）
//! - **mcp**: JSON-RPC stdio 传输、MCP 会话与工具端点抽象
//! - **memory**: 对话历史（轮次、内容块、工具调用请求与结果）
//! - **observability**: tracing 日志初始化
//! - **react**: 编排主循环与过程事件
//! - **tools**: 工具目录与工具调用器
//! - **ui**: 行式 REPL

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
pub mod ui;

pub use agent::{connect_agent, ChatAgent};
