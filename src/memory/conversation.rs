//! 对话历史：Turn / ContentBlock 与只追加的 ConversationHistory
//!
//! 一次提问对应一个 ConversationState（history + rounds_used），由编排循环独占；
//! 历史只允许 push，已写入的 Turn 不会被修改或删除。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 消息角色（user / assistant / tool）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// 模型请求调用的工具：id 由模型分配，用于与结果对应
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub tool_name: String,
    /// 已解码的参数对象（不是 JSON 字符串）
    pub arguments: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// 工具调用结果：output 已归一化为文本，ok=false 表示工具失败
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub id: String,
    pub output: String,
    pub ok: bool,
}

impl ToolCallResult {
    pub fn success(id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output: output.into(),
            ok: true,
        }
    }

    pub fn failure(id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output: output.into(),
            ok: false,
        }
    }
}

/// 单个内容块
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { value: String },
    ToolCallRequest(ToolCallRequest),
    ToolCallResult(ToolCallResult),
}

impl ContentBlock {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
        }
    }
}

/// 一轮发言：角色 + 有序内容块
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub blocks: Vec<ContentBlock>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            blocks: vec![ContentBlock::text(content)],
        }
    }

    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            blocks,
        }
    }

    pub fn tool(result: ToolCallResult) -> Self {
        Self {
            role: Role::Tool,
            blocks: vec![ContentBlock::ToolCallResult(result)],
        }
    }

    /// 按出现顺序返回本轮的工具调用请求
    pub fn tool_requests(&self) -> impl Iterator<Item = &ToolCallRequest> {
        self.blocks.iter().filter_map(|b| match b {
            ContentBlock::ToolCallRequest(req) => Some(req),
            _ => None,
        })
    }

    pub fn has_tool_requests(&self) -> bool {
        self.tool_requests().next().is_some()
    }

    /// 按顺序拼接所有 Text 块（换行分隔）
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { value } => Some(value.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 只追加的对话历史
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// 单次提问的会话状态；多轮聊天时 history 可跨提问累积，rounds_used 每次提问归零
#[derive(Clone, Debug, Default)]
pub struct ConversationState {
    pub history: ConversationHistory,
    pub rounds_used: usize,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始新一次提问：保留历史，重置轮数
    pub fn begin_query(&mut self, query: &str) {
        self.rounds_used = 0;
        self.history.push(Turn::user(query));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_turn_text_joins_in_order() {
        let turn = Turn::assistant(vec![
            ContentBlock::text("uno"),
            ContentBlock::ToolCallRequest(ToolCallRequest::new("t1", "echo", Map::new())),
            ContentBlock::text("dos"),
        ]);
        assert_eq!(turn.text(), "uno\ndos");
        assert!(turn.has_tool_requests());
    }

    #[test]
    fn test_tool_requests_preserve_order() {
        let turn = Turn::assistant(vec![
            ContentBlock::ToolCallRequest(ToolCallRequest::new("a", "x", args(json!({"k": 1})))),
            ContentBlock::ToolCallRequest(ToolCallRequest::new("b", "y", Map::new())),
        ]);
        let ids: Vec<&str> = turn.tool_requests().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_begin_query_keeps_history_and_resets_rounds() {
        let mut state = ConversationState::new();
        state.begin_query("hola");
        state.rounds_used = 3;
        state.begin_query("otra");
        assert_eq!(state.rounds_used, 0);
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.history.turns()[0], Turn::user("hola"));
    }

    #[test]
    fn test_content_block_serde_tag() {
        let block = ContentBlock::ToolCallResult(ToolCallResult::failure("t1", "boom"));
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "tool_call_result");
        assert_eq!(v["ok"], false);
    }
}
