//! 错误恢复引擎
//!
//! 根据 ChatError 类型返回 RecoveryAction，供 REPL 决定是报告后继续还是结束会话。

use crate::core::{ChatError, RecoveryAction};

/// 将单次提问的错误映射为 REPL 可执行的动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &ChatError) -> RecoveryAction {
        match err {
            ChatError::RoundLimitExceeded { max_rounds } => RecoveryAction::Report(format!(
                "No final answer: the model was still requesting tools after {max_rounds} rounds. \
                 Try rephrasing the question or raising app.max_rounds."
            )),
            ChatError::ModelError(e) => RecoveryAction::Report(format!("Error: {e}")),
            ChatError::Cancelled => RecoveryAction::Report("Query cancelled.".to_string()),
            e if e.is_session_fatal() => RecoveryAction::Terminate(format!("Fatal: {e}")),
            e => RecoveryAction::Report(format!("Error: {e}")),
        }
    }
}
