//! 编排主循环
//!
//! 状态机：AwaitingModel -> (无工具调用) Done | (有工具调用) DispatchingTools -> AwaitingModel ...
//! 一次模型回复中的全部工具调用在下一次模型调用前按顺序解决，每个结果紧随调用写入历史；
//! 工具轮数超过 max_rounds 时以 RoundLimitExceeded 结束，不会无限循环。
//! 可选 event_tx：向 REPL 推送 Thinking / Text / ToolCall / ToolResult。

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::ChatError;
use crate::llm::LlmClient;
use crate::memory::{ContentBlock, ConversationState, Role, ToolCallRequest, ToolCallResult, Turn};
use crate::react::LoopEvent;
use crate::tools::{Invocation, ToolCatalog, ToolInvoker};

/// 工具结果预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

/// 循环状态
#[derive(Debug)]
pub(crate) enum LoopState {
    AwaitingModel,
    DispatchingTools,
    Done(String),
    Failed(ChatError),
}

/// 循环执行结果：最终回答与本次提问用掉的工具轮数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopResult {
    pub answer: String,
    pub rounds_used: usize,
}

/// 一次提问的运行配置
pub struct LoopSession<'a> {
    pub llm: &'a dyn LlmClient,
    pub invoker: &'a ToolInvoker,
    /// 本次提问期间只读的工具目录（与交给模型的完全一致）
    pub catalog: &'a ToolCatalog,
    pub max_rounds: usize,
    /// 同轮工具是否并发派发
    pub parallel_tools: bool,
    pub cancel_token: CancellationToken,
    pub event_tx: Option<&'a UnboundedSender<LoopEvent>>,
}

impl<'a> LoopSession<'a> {
    pub fn new(
        llm: &'a dyn LlmClient,
        invoker: &'a ToolInvoker,
        catalog: &'a ToolCatalog,
        max_rounds: usize,
    ) -> Self {
        Self {
            llm,
            invoker,
            catalog,
            max_rounds,
            parallel_tools: false,
            cancel_token: CancellationToken::new(),
            event_tx: None,
        }
    }

    pub fn with_parallel_tools(mut self, parallel: bool) -> Self {
        self.parallel_tools = parallel;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<LoopEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn send_event(&self, ev: LoopEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }
}

/// 执行一次提问：把 query 作为 user 轮写入历史，驱动状态机直到 Done 或 Failed
pub async fn run_query(
    session: &LoopSession<'_>,
    state: &mut ConversationState,
    query: &str,
) -> Result<LoopResult, ChatError> {
    state.begin_query(query);
    tracing::info!(
        model = %session.llm.model(),
        tools = session.catalog.len(),
        max_rounds = session.max_rounds,
        "query started"
    );

    let mut phase = LoopState::AwaitingModel;
    loop {
        phase = match phase {
            LoopState::AwaitingModel => await_model(session, state).await,
            LoopState::DispatchingTools => dispatch_tools(session, state).await,
            LoopState::Done(answer) => {
                tracing::info!(rounds = state.rounds_used, "query done");
                return Ok(LoopResult {
                    answer,
                    rounds_used: state.rounds_used,
                });
            }
            LoopState::Failed(err) => {
                tracing::warn!(error = %err, rounds = state.rounds_used, "query failed");
                session.send_event(LoopEvent::Error {
                    text: err.to_string(),
                });
                return Err(err);
            }
        };
    }
}

async fn await_model(session: &LoopSession<'_>, state: &mut ConversationState) -> LoopState {
    if session.cancel_token.is_cancelled() {
        return LoopState::Failed(ChatError::Cancelled);
    }
    session.send_event(LoopEvent::Thinking);
    tracing::debug!(turns = state.history.len(), "calling model");

    let generated = tokio::select! {
        _ = session.cancel_token.cancelled() => return LoopState::Failed(ChatError::Cancelled),
        r = session.llm.generate(state.history.turns(), session.catalog) => r,
    };
    let blocks = match generated {
        Ok(blocks) => blocks,
        Err(e) => return LoopState::Failed(ChatError::ModelError(e)),
    };

    let turn = Turn::assistant(blocks);
    if !turn.has_tool_requests() {
        let answer = turn.text();
        state.history.push(turn);
        return LoopState::Done(answer);
    }

    // 与工具调用同轮的文本只作轨迹，不终止循环
    for block in &turn.blocks {
        if let ContentBlock::Text { value } = block {
            if !value.is_empty() {
                session.send_event(LoopEvent::Text {
                    text: value.clone(),
                });
            }
        }
    }
    state.history.push(turn);
    LoopState::DispatchingTools
}

async fn dispatch_tools(session: &LoopSession<'_>, state: &mut ConversationState) -> LoopState {
    let requests: Vec<ToolCallRequest> = match state.history.last() {
        Some(turn) if turn.role == Role::Assistant => turn.tool_requests().cloned().collect(),
        _ => Vec::new(),
    };

    if state.rounds_used >= session.max_rounds {
        close_unresolved(state, &requests, "round limit exceeded; tool call not executed");
        return LoopState::Failed(ChatError::RoundLimitExceeded {
            max_rounds: session.max_rounds,
        });
    }
    state.rounds_used += 1;
    session.send_event(LoopEvent::RoundUpdate {
        round: state.rounds_used,
        max_rounds: session.max_rounds,
    });

    if session.parallel_tools {
        for req in &requests {
            announce(session, req);
        }
        let calls = join_all(
            requests
                .iter()
                .map(|req| session.invoker.invoke(req, session.catalog)),
        );
        let invocations = tokio::select! {
            _ = session.cancel_token.cancelled() => {
                close_unresolved(state, &requests, "cancelled; tool call abandoned");
                return LoopState::Failed(ChatError::Cancelled);
            }
            inv = calls => inv,
        };
        // 按请求顺序写回，与完成顺序无关
        let mut lost = None;
        for (req, inv) in requests.iter().zip(invocations) {
            if let Some(err) = record(session, state, req, inv) {
                lost.get_or_insert(err);
            }
        }
        if let Some(err) = lost {
            return LoopState::Failed(err);
        }
    } else {
        for (i, req) in requests.iter().enumerate() {
            announce(session, req);
            let inv = tokio::select! {
                _ = session.cancel_token.cancelled() => {
                    close_unresolved(state, &requests[i..], "cancelled; tool call abandoned");
                    return LoopState::Failed(ChatError::Cancelled);
                }
                inv = session.invoker.invoke(req, session.catalog) => inv,
            };
            if let Some(err) = record(session, state, req, inv) {
                close_unresolved(
                    state,
                    &requests[i + 1..],
                    "connection to tool server lost; tool call not executed",
                );
                return LoopState::Failed(err);
            }
        }
    }

    LoopState::AwaitingModel
}

fn announce(session: &LoopSession<'_>, req: &ToolCallRequest) {
    session.send_event(LoopEvent::ToolCall {
        id: req.id.clone(),
        tool: req.tool_name.clone(),
        args: Value::Object(req.arguments.clone()),
    });
}

/// 写入一个 tool 轮；连接已断开时返回 ConnectionLost
fn record(
    session: &LoopSession<'_>,
    state: &mut ConversationState,
    req: &ToolCallRequest,
    inv: Invocation,
) -> Option<ChatError> {
    let preview: String = inv.result.output.chars().take(RESULT_PREVIEW_CHARS).collect();
    session.send_event(LoopEvent::ToolResult {
        id: inv.result.id.clone(),
        tool: req.tool_name.clone(),
        ok: inv.result.ok,
        preview,
    });
    let lost = inv.is_connection_lost();
    state.history.push(Turn::tool(inv.result));
    if lost {
        inv.failure
    } else {
        None
    }
}

/// 为未执行的请求补上失败结果，保证每个请求都有对应结果
fn close_unresolved(state: &mut ConversationState, requests: &[ToolCallRequest], reason: &str) {
    for req in requests {
        state
            .history
            .push(Turn::tool(ToolCallResult::failure(&req.id, reason)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use crate::llm::{LlmError, MockLlmClient};
    use crate::mcp::{CallToolResult, MockBehavior, MockToolEndpoint, ToolDescriptor};

    fn catalog() -> ToolCatalog {
        ToolCatalog::new(vec![
            ToolDescriptor::new("a_tool", "A", json!({"type": "object"})),
            ToolDescriptor::new("b_tool", "B", json!({"type": "object"})),
        ])
    }

    fn call(id: &str, tool: &str) -> ContentBlock {
        ContentBlock::ToolCallRequest(ToolCallRequest::new(id, tool, serde_json::Map::new()))
    }

    #[tokio::test]
    async fn test_mixed_turn_text_is_traced_not_final() {
        let llm = MockLlmClient::scripted(vec![
            vec![ContentBlock::text("Voy a mirar."), call("a", "a_tool")],
            vec![ContentBlock::text("Listo.")],
        ]);
        let endpoint = Arc::new(MockToolEndpoint::new(vec![]));
        let invoker = ToolInvoker::new(endpoint, 5);
        let catalog = catalog();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session = LoopSession::new(&llm, &invoker, &catalog, 3).with_event_tx(&tx);
        let mut state = ConversationState::new();

        let result = run_query(&session, &mut state, "hola").await.unwrap();
        assert_eq!(result.answer, "Listo.");
        assert_eq!(result.rounds_used, 1);

        drop(session);
        drop(tx);
        let mut traces = Vec::new();
        while let Some(ev) = rx.recv().await {
            if let Some(line) = ev.trace_line() {
                traces.push(line);
            }
        }
        assert_eq!(
            traces,
            vec![
                "Voy a mirar.".to_string(),
                "[Calling tool a_tool with arguments {}]".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_model_error_fails_query() {
        let llm = MockLlmClient::scripted(vec![]).then_fail(LlmError::Http("reset".to_string()));
        let invoker = ToolInvoker::new(Arc::new(MockToolEndpoint::new(vec![])), 5);
        let catalog = catalog();
        let session = LoopSession::new(&llm, &invoker, &catalog, 3);
        let mut state = ConversationState::new();

        let err = run_query(&session, &mut state, "hola").await.unwrap_err();
        assert!(matches!(err, ChatError::ModelError(LlmError::Http(_))));
        // 只有 user 轮，失败的模型调用不写入历史
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn test_round_limit_closes_outstanding_requests() {
        let llm = MockLlmClient::repeating(vec![call("a", "a_tool")]);
        let endpoint = Arc::new(MockToolEndpoint::new(vec![]));
        let invoker = ToolInvoker::new(endpoint.clone(), 5);
        let catalog = catalog();
        let session = LoopSession::new(&llm, &invoker, &catalog, 2);
        let mut state = ConversationState::new();

        let err = run_query(&session, &mut state, "loop").await.unwrap_err();
        assert!(matches!(err, ChatError::RoundLimitExceeded { max_rounds: 2 }));
        assert_eq!(endpoint.call_count(), 2);
        assert_eq!(state.rounds_used, 2);
        let last = state.history.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        match &last.blocks[0] {
            ContentBlock::ToolCallResult(r) => assert!(!r.ok),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_parallel_dispatch_keeps_request_order() {
        let llm = MockLlmClient::scripted(vec![
            vec![call("a", "a_tool"), call("b", "b_tool")],
            vec![ContentBlock::text("fin")],
        ]);
        let endpoint = Arc::new(
            MockToolEndpoint::new(vec![])
                .with_behavior(
                    "a_tool",
                    MockBehavior::Delay(Duration::from_millis(50), CallToolResult::text("slow")),
                )
                .with_reply("b_tool", "fast"),
        );
        let invoker = ToolInvoker::new(endpoint, 5);
        let catalog = catalog();
        let session = LoopSession::new(&llm, &invoker, &catalog, 3).with_parallel_tools(true);
        let mut state = ConversationState::new();

        run_query(&session, &mut state, "dos").await.unwrap();
        let turns = state.history.turns();
        assert_eq!(turns[2], Turn::tool(ToolCallResult::success("a", "slow")));
        assert_eq!(turns[3], Turn::tool(ToolCallResult::success("b", "fast")));
    }

    #[tokio::test]
    async fn test_connection_lost_ends_query_after_resolving_requests() {
        let llm = MockLlmClient::scripted(vec![vec![call("a", "a_tool"), call("b", "b_tool")]]);
        let endpoint = Arc::new(
            MockToolEndpoint::new(vec![]).with_behavior("a_tool", MockBehavior::Disconnect),
        );
        let invoker = ToolInvoker::new(endpoint.clone(), 5);
        let catalog = catalog();
        let session = LoopSession::new(&llm, &invoker, &catalog, 3);
        let mut state = ConversationState::new();

        let err = run_query(&session, &mut state, "x").await.unwrap_err();
        assert!(matches!(err, ChatError::ConnectionLost(_)));
        assert_eq!(endpoint.call_count(), 1);
        // user, assistant, result(a), result(b: not executed)
        assert_eq!(state.history.len(), 4);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let llm = MockLlmClient::repeating(vec![ContentBlock::text("never")]);
        let invoker = ToolInvoker::new(Arc::new(MockToolEndpoint::new(vec![])), 5);
        let catalog = catalog();
        let token = CancellationToken::new();
        token.cancel();
        let session = LoopSession::new(&llm, &invoker, &catalog, 3).with_cancel_token(token);
        let mut state = ConversationState::new();

        let err = run_query(&session, &mut state, "x").await.unwrap_err();
        assert!(matches!(err, ChatError::Cancelled));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_tool_call_resolves_request() {
        let llm = MockLlmClient::scripted(vec![vec![call("a", "a_tool")]]);
        let endpoint = Arc::new(MockToolEndpoint::new(vec![]).with_behavior(
            "a_tool",
            MockBehavior::Delay(Duration::from_secs(10), CallToolResult::text("late")),
        ));
        let invoker = ToolInvoker::new(endpoint, 30);
        let catalog = catalog();
        let token = CancellationToken::new();
        let session =
            LoopSession::new(&llm, &invoker, &catalog, 3).with_cancel_token(token.clone());
        let mut state = ConversationState::new();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        });
        let err = run_query(&session, &mut state, "x").await.unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, ChatError::Cancelled));
        assert_eq!(
            state.history.last().unwrap(),
            &Turn::tool(ToolCallResult::failure("a", "cancelled; tool call abandoned"))
        );
    }
}
