//! 工具服务器会话：按脚本扩展名选择解释器启动子进程，完成 MCP 握手后提供 tools/list 与 tools/call

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::config::ServerSection;
use crate::core::ChatError;
use crate::mcp::protocol::{
    call_tool_params, initialize_params, CallToolResult, InitializeResult, ListToolsResult,
    ToolDescriptor, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::mcp::{McpError, StdioTransport, ToolEndpoint};

/// 工具服务器脚本类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    Python,
    Node,
}

impl ServerKind {
    /// 按扩展名识别脚本类型；.py / .js 之外一律拒绝
    pub fn detect(script_path: &str) -> Result<Self, ChatError> {
        match Path::new(script_path).extension().and_then(|e| e.to_str()) {
            Some("py") => Ok(ServerKind::Python),
            Some("js") => Ok(ServerKind::Node),
            _ => Err(ChatError::UnsupportedServerKind(script_path.to_string())),
        }
    }

    pub fn interpreter<'a>(&self, cfg: &'a ServerSection) -> &'a str {
        match self {
            ServerKind::Python => &cfg.python_command,
            ServerKind::Node => &cfg.node_command,
        }
    }
}

/// 启动工具服务器子进程并建立 stdio 会话（尚未握手，调用方需先 initialize）
pub async fn connect(script_path: &str, cfg: &ServerSection) -> Result<Session, ChatError> {
    let kind = ServerKind::detect(script_path)?;
    let program = kind.interpreter(cfg);
    tracing::info!(program = %program, script = %script_path, "starting tool server");

    let mut child = Command::new(program)
        .arg(script_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ChatError::ServerStart(format!("{program} {script_path}: {e}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ChatError::ServerStart("child stdin unavailable".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ChatError::ServerStart("child stdout unavailable".to_string()))?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "mcp_server", "{}", line);
            }
        });
    }

    let transport = StdioTransport::start(
        stdout,
        stdin,
        Duration::from_secs(cfg.request_timeout_secs),
    );
    let session = Session::from_transport(transport, cfg);
    *session.child.lock().await = Some(child);
    Ok(session)
}

/// 与一个工具服务器的 MCP 会话
pub struct Session {
    transport: Arc<StdioTransport>,
    child: Mutex<Option<Child>>,
    initialized: AtomicBool,
    /// tools/call 的等待上限，默认与传输的请求超时相同
    call_timeout: Duration,
    client_name: String,
    client_version: String,
}

impl Session {
    /// 基于已建立的传输创建会话（子进程之外的场景，如测试中的内存管道）
    pub fn from_transport(transport: Arc<StdioTransport>, cfg: &ServerSection) -> Self {
        Self {
            transport,
            child: Mutex::new(None),
            initialized: AtomicBool::new(false),
            call_timeout: Duration::from_secs(cfg.request_timeout_secs),
            client_name: cfg.client_name.clone(),
            client_version: cfg.client_version.clone(),
        }
    }

    /// 放宽 tools/call 的等待上限，使调用方自己的工具超时先生效
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// MCP 握手：initialize 请求 + notifications/initialized 通知；每个会话只需调用一次
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let raw = self
            .transport
            .request(
                METHOD_INITIALIZE,
                Some(initialize_params(&self.client_name, &self.client_version)),
            )
            .await?;
        let result: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| McpError::Protocol(format!("bad initialize result: {e}")))?;
        self.transport.notify(METHOD_INITIALIZED, None).await?;
        self.initialized.store(true, Ordering::SeqCst);
        if let Some(info) = &result.server_info {
            tracing::info!(
                server = %info.name,
                version = %info.version,
                protocol = %result.protocol_version,
                "mcp session initialized"
            );
        }
        Ok(result)
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// 结束子进程
    pub async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "failed to kill tool server");
            }
        }
    }

    fn ensure_initialized(&self) -> Result<(), McpError> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(McpError::NotInitialized)
        }
    }
}

#[async_trait]
impl ToolEndpoint for Session {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.ensure_initialized()?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let raw = self.transport.request(METHOD_TOOLS_LIST, params).await?;
            let page: ListToolsResult = serde_json::from_value(raw)
                .map_err(|e| McpError::Protocol(format!("bad tools/list result: {e}")))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<CallToolResult, McpError> {
        self.ensure_initialized()?;
        let raw = self
            .transport
            .request_with_timeout(
                METHOD_TOOLS_CALL,
                Some(call_tool_params(name, arguments)),
                self.call_timeout,
            )
            .await?;
        serde_json::from_value(raw)
            .map_err(|e| McpError::Protocol(format!("bad tools/call result: {e}")))
    }

    fn is_connected(&self) -> bool {
        !self.transport.is_closed()
    }
}
