//! 会话级 Agent 运行时
//!
//! connect_agent 启动工具服务器、完成握手并拉取工具目录，构造 ChatAgent；
//! process_query 对单条用户输入跑编排循环并返回最终回答。
//! 目录只在建立会话或显式 refresh_catalog 时更新，提问过程中保持不变。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, Credentials};
use crate::core::ChatError;
use crate::llm::{create_llm_from_config, LlmClient};
use crate::mcp::{connect, Session, ToolEndpoint};
use crate::memory::{ConversationHistory, ConversationState};
use crate::react::{run_query, LoopEvent, LoopSession};
use crate::tools::{ToolCatalog, ToolCatalogAdapter, ToolInvoker};

/// 一次客户端会话：工具端点、模型、工具目录与对话状态
pub struct ChatAgent {
    /// 真实子进程会话；测试中直接注入端点时为 None
    session: Option<Arc<Session>>,
    endpoint: Arc<dyn ToolEndpoint>,
    catalog: ToolCatalog,
    llm: Arc<dyn LlmClient>,
    invoker: ToolInvoker,
    max_rounds: usize,
    parallel_tools: bool,
    keep_history: bool,
    state: ConversationState,
}

/// 建立会话：识别脚本类型并启动服务器、MCP 握手、拉取工具目录
///
/// 任何一步失败都会结束已启动的子进程并返回会话级致命错误。
pub async fn connect_agent(
    script_path: &str,
    cfg: &AppConfig,
    credentials: &Credentials,
) -> Result<ChatAgent, ChatError> {
    // tools/call 的传输等待不得早于调用器的工具超时
    let call_timeout = cfg
        .server
        .request_timeout_secs
        .max(cfg.tools.tool_timeout_secs);
    let session = Arc::new(
        connect(script_path, &cfg.server)
            .await?
            .with_call_timeout(Duration::from_secs(call_timeout)),
    );
    if let Err(e) = session.initialize().await {
        session.shutdown().await;
        return Err(ChatError::CatalogUnavailable(format!(
            "initialize handshake failed: {e}"
        )));
    }

    let llm: Arc<dyn LlmClient> = Arc::new(create_llm_from_config(cfg, credentials));
    let endpoint: Arc<dyn ToolEndpoint> = session.clone();
    match ChatAgent::from_parts(endpoint, llm, cfg).await {
        Ok(mut agent) => {
            agent.session = Some(session);
            Ok(agent)
        }
        Err(e) => {
            session.shutdown().await;
            Err(e)
        }
    }
}

impl ChatAgent {
    /// 由已就绪的端点与模型构造 Agent，并立即拉取一次工具目录
    pub async fn from_parts(
        endpoint: Arc<dyn ToolEndpoint>,
        llm: Arc<dyn LlmClient>,
        cfg: &AppConfig,
    ) -> Result<Self, ChatError> {
        let catalog = ToolCatalogAdapter::new(endpoint.clone()).fetch().await?;
        Ok(Self {
            session: None,
            invoker: ToolInvoker::new(endpoint.clone(), cfg.tools.tool_timeout_secs),
            endpoint,
            catalog,
            llm,
            max_rounds: cfg.app.max_rounds,
            parallel_tools: cfg.tools.parallel_calls,
            keep_history: cfg.app.keep_history,
            state: ConversationState::new(),
        })
    }

    /// 处理一次提问；event_tx 用于实时推送工具调用轨迹，cancel_token 取消后以 Cancelled 结束
    pub async fn process_query(
        &mut self,
        query: &str,
        event_tx: Option<&UnboundedSender<LoopEvent>>,
        cancel_token: CancellationToken,
    ) -> Result<String, ChatError> {
        if !self.endpoint.is_connected() {
            return Err(ChatError::ConnectionLost(
                "tool server is no longer running".to_string(),
            ));
        }
        if !self.keep_history {
            self.state = ConversationState::new();
        }

        let mut session = LoopSession::new(
            self.llm.as_ref(),
            &self.invoker,
            &self.catalog,
            self.max_rounds,
        )
        .with_parallel_tools(self.parallel_tools)
        .with_cancel_token(cancel_token);
        if let Some(tx) = event_tx {
            session = session.with_event_tx(tx);
        }

        let result = run_query(&session, &mut self.state, query).await?;
        Ok(result.answer)
    }

    /// 重新拉取工具目录；失败时保留旧目录
    pub async fn refresh_catalog(&mut self) -> Result<usize, ChatError> {
        let catalog = ToolCatalogAdapter::new(self.endpoint.clone()).fetch().await?;
        self.catalog = catalog;
        Ok(self.catalog.len())
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.catalog.tool_names()
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// 最近一次提问（或保留历史时整个会话）的对话历史
    pub fn history(&self) -> &ConversationHistory {
        &self.state.history
    }

    pub fn model(&self) -> &str {
        self.llm.model()
    }

    /// 结束工具服务器子进程
    pub async fn shutdown(&self) {
        if let Some(session) = &self.session {
            session.shutdown().await;
            tracing::info!("tool server stopped");
        }
    }
}
