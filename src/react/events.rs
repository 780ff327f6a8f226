//! 编排过程事件：供 REPL 等前端实时展示工具调用轨迹与中间文本

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// 进入新一轮工具派发
    RoundUpdate { round: usize, max_rounds: usize },
    /// 正在调用模型
    Thinking,
    /// 与工具调用同轮出现的文本（不终止循环，仅作轨迹）
    Text { text: String },
    /// 即将调用工具（结果尚未可知）
    ToolCall {
        id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    ToolResult {
        id: String,
        tool: String,
        ok: bool,
        preview: String,
    },
    Error { text: String },
}

impl LoopEvent {
    /// REPL 中展示的工具调用轨迹行
    pub fn trace_line(&self) -> Option<String> {
        match self {
            LoopEvent::ToolCall { tool, args, .. } => {
                Some(format!("[Calling tool {} with arguments {}]", tool, args))
            }
            LoopEvent::Text { text } => Some(text.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_line_for_tool_call() {
        let ev = LoopEvent::ToolCall {
            id: "t1".to_string(),
            tool: "clima_actual".to_string(),
            args: serde_json::json!({"city": "Granada"}),
        };
        assert_eq!(
            ev.trace_line().unwrap(),
            r#"[Calling tool clima_actual with arguments {"city":"Granada"}]"#
        );
        assert!(LoopEvent::Thinking.trace_line().is_none());
    }
}
