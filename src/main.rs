//! mcp-chat - MCP 工具客户端
//!
//! 入口：初始化日志，启动工具服务器并建立会话，然后运行 REPL。
//! 用法：mcp-chat <path_to_server_script>（.py 或 .js）

use std::process::ExitCode;

use anyhow::Context;
use mcp_chat::{
    agent::connect_agent,
    config::{load_config, Credentials},
    observability,
    ui::{run_repl, ReplExit},
};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    observability::init();

    let Some(script_path) = std::env::args().nth(1) else {
        eprintln!("Usage: mcp-chat <path_to_server_script>");
        return Ok(ExitCode::from(1));
    };

    // 配置文件路径可通过 MCP_CHAT_CONFIG 指定，否则读 config/default.toml
    let config_path = std::env::var_os("MCP_CHAT_CONFIG").map(Into::into);
    let cfg = load_config(config_path).context("Failed to load configuration")?;
    let credentials = Credentials::from_env();
    tracing::info!(provider = %cfg.llm.provider, ?credentials, "configuration loaded");

    let mut agent = match connect_agent(&script_path, &cfg, &credentials).await {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("Fatal: {e}");
            return Ok(ExitCode::from(1));
        }
    };

    let exit = run_repl(&mut agent).await;
    agent.shutdown().await;

    match exit.context("REPL failed")? {
        ReplExit::Quit | ReplExit::EndOfInput => Ok(ExitCode::SUCCESS),
        ReplExit::Terminated(_) => Ok(ExitCode::from(1)),
    }
}
