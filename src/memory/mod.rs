//! 记忆层：单次提问内的对话历史（只追加）

pub mod conversation;

pub use conversation::{
    ContentBlock, ConversationHistory, ConversationState, Role, ToolCallRequest, ToolCallResult,
    Turn,
};
