//! 行式 REPL 主循环
//!
//! 逐行读取提问，`quit`（不区分大小写）结束；提问执行期间实时打印工具调用轨迹。
//! Ctrl-C 在提问执行中只取消当前提问，在等待输入时结束会话。
//! 错误交给 RecoveryEngine 决定报告后继续还是结束会话。

use std::future::Future;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::ChatAgent;
use crate::core::{ChatError, RecoveryAction, RecoveryEngine};
use crate::react::LoopEvent;

/// REPL 结束原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplExit {
    /// 用户输入 quit
    Quit,
    /// 标准输入关闭
    EndOfInput,
    /// 会话级致命错误
    Terminated(String),
}

/// 在标准输入输出上运行 REPL，中断来源为 Ctrl-C
pub async fn run_repl(agent: &mut ChatAgent) -> anyhow::Result<ReplExit> {
    let reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    run_repl_with(agent, reader, &mut stdout, ctrl_c).await
}

/// 等待一次 Ctrl-C；无法注册信号处理时永不完成
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}

/// 在任意输入输出上运行 REPL；interrupt 每次调用返回一个等待下一次中断的 future
pub async fn run_repl_with<R, W, F, Fut>(
    agent: &mut ChatAgent,
    reader: R,
    writer: &mut W,
    mut interrupt: F,
) -> anyhow::Result<ReplExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let recovery = RecoveryEngine::new();
    let mut lines = reader.lines();

    write_line(
        writer,
        &format!("\nConnected to server with tools: {:?}", agent.tool_names()),
    )
    .await?;
    write_line(writer, "\nMCP client started!").await?;
    write_line(writer, "Type your queries or 'quit' to exit.").await?;

    loop {
        writer.write_all(b"\nQuery: ").await?;
        writer.flush().await?;

        // 空闲时 Ctrl-C 结束会话（信号处理一旦注册，默认的进程退出行为就不再生效）
        let next = tokio::select! {
            line = lines.next_line() => line?,
            _ = interrupt() => {
                write_line(writer, "").await?;
                tracing::info!("interrupt received at prompt, exiting");
                return Ok(ReplExit::Quit);
            }
        };
        let Some(line) = next else {
            return Ok(ReplExit::EndOfInput);
        };
        let query = line.trim();
        if query.eq_ignore_ascii_case("quit") {
            return Ok(ReplExit::Quit);
        }
        if query.is_empty() {
            continue;
        }

        match run_one(agent, query, writer, &mut interrupt).await? {
            Ok(answer) => write_line(writer, &format!("\n{answer}")).await?,
            Err(err) => match recovery.handle(&err) {
                RecoveryAction::Report(msg) => write_line(writer, &format!("\n{msg}")).await?,
                RecoveryAction::Terminate(msg) => {
                    write_line(writer, &format!("\n{msg}")).await?;
                    return Ok(ReplExit::Terminated(msg));
                }
            },
        }
    }
}

/// 执行一次提问，同时转发轨迹事件并监听中断
async fn run_one<W, F, Fut>(
    agent: &mut ChatAgent,
    query: &str,
    writer: &mut W,
    interrupt: &mut F,
) -> anyhow::Result<Result<String, ChatError>>
where
    W: AsyncWrite + Unpin,
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<LoopEvent>();
    let cancel = CancellationToken::new();
    let mut armed = true;

    let outcome = {
        let query_fut = agent.process_query(query, Some(&tx), cancel.clone());
        tokio::pin!(query_fut);
        loop {
            tokio::select! {
                biased;
                Some(ev) = rx.recv() => {
                    if let Some(line) = ev.trace_line() {
                        write_line(writer, &line).await?;
                    }
                }
                _ = interrupt(), if armed => {
                    armed = false;
                    tracing::info!("interrupt received, cancelling query");
                    cancel.cancel();
                }
                res = &mut query_fut => break res,
            }
        }
    };

    while let Ok(ev) = rx.try_recv() {
        if let Some(line) = ev.trace_line() {
            write_line(writer, &line).await?;
        }
    }
    Ok(outcome)
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
