//! MCP 传输与协议错误

use thiserror::Error;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("MCP I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MCP connection closed")]
    Closed,

    #[error("MCP request timed out: {0}")]
    Timeout(String),

    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP session not initialized")]
    NotInitialized,
}

impl McpError {
    /// 连接已不可用（子进程退出或管道断开）
    pub fn is_disconnect(&self) -> bool {
        matches!(self, McpError::Closed | McpError::Io(_))
    }
}
