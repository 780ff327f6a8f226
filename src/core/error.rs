//! 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 ChatError 决定报告后继续（单次提问失败）还是终止会话。

use thiserror::Error;

use crate::llm::LlmError;

/// 客户端运行过程中可能出现的错误（会话建立、模型调用、工具调用、轮数上限等）
#[derive(Error, Debug)]
pub enum ChatError {
    /// 服务器脚本扩展名既不是 .py 也不是 .js
    #[error("Unsupported server script (expected a .py or .js file): {0}")]
    UnsupportedServerKind(String),

    #[error("Failed to start tool server: {0}")]
    ServerStart(String),

    #[error("Tool catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Model error: {0}")]
    ModelError(#[from] LlmError),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionError(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Round limit exceeded: the model kept requesting tools after {max_rounds} rounds")]
    RoundLimitExceeded { max_rounds: usize },

    #[error("Connection to tool server lost: {0}")]
    ConnectionLost(String),

    #[error("Cancelled by user")]
    Cancelled,
}

impl ChatError {
    /// 会话级致命错误：出现后任何提问都无法继续
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            ChatError::UnsupportedServerKind(_)
                | ChatError::ServerStart(_)
                | ChatError::CatalogUnavailable(_)
                | ChatError::ConnectionLost(_)
        )
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 打印诊断信息，继续接受下一次提问
    Report(String),
    /// 打印后结束会话
    Terminate(String),
}
