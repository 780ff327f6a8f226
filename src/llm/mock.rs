//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本依次返回预置的内容块；脚本用完后可重复一个固定回复。
//! 记录调用次数与每次看到的完整历史，便于断言编排循环的行为。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{ContentBlock, Turn};
use crate::tools::ToolCatalog;

type Scripted = Result<Vec<ContentBlock>, LlmError>;

#[derive(Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Scripted>>,
    repeat: Option<Vec<ContentBlock>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<Turn>>>,
}

impl MockLlmClient {
    /// 依次返回给定的回复
    pub fn scripted(responses: Vec<Vec<ContentBlock>>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    /// 每次都返回同一回复
    pub fn repeating(response: Vec<ContentBlock>) -> Self {
        Self {
            repeat: Some(response),
            ..Self::default()
        }
    }

    /// 在脚本末尾追加一次失败
    pub fn then_fail(self, err: LlmError) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(err));
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用时传入的历史快照
    pub fn seen_histories(&self) -> Vec<Vec<Turn>> {
        self.seen
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(
        &self,
        history: &[Turn],
        _catalog: &ToolCatalog,
    ) -> Result<Vec<ContentBlock>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(history.to_vec());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match (next, &self.repeat) {
            (Some(scripted), _) => scripted,
            (None, Some(repeat)) => Ok(repeat.clone()),
            (None, None) => Err(LlmError::Other("mock script exhausted".to_string())),
        }
    }

    fn model(&self) -> &str {
        "mock"
    }
}
