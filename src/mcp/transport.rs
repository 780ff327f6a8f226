//! stdio 传输：按行写出 JSON-RPC 请求，后台任务读取响应并按 id 派发给等待方
//!
//! 读写两端是泛型的 AsyncRead / AsyncWrite，子进程管道与测试用的 duplex 共用同一实现。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;

use crate::mcp::protocol::{
    parse_incoming, IncomingMessage, JsonRpcNotification, JsonRpcRequest, METHOD_NOT_FOUND,
};
use crate::mcp::McpError;

type Waiter = oneshot::Sender<Result<Value, McpError>>;
type PendingMap = Arc<Mutex<HashMap<u64, Waiter>>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 请求被放弃（超时或调用方 future 被丢弃）时移除等待项
struct PendingGuard {
    pending: PendingMap,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.id);
    }
}

fn lock(pending: &PendingMap) -> std::sync::MutexGuard<'_, HashMap<u64, Waiter>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// 行分隔 JSON-RPC 传输
pub struct StdioTransport {
    writer: tokio::sync::Mutex<BoxedWriter>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl StdioTransport {
    /// 创建传输并启动后台读取任务
    pub fn start<R, W>(reader: R, writer: W, request_timeout: Duration) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let transport = Arc::new(Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            closed: Arc::new(AtomicBool::new(false)),
            request_timeout,
        });
        tokio::spawn(Self::read_loop(transport.clone(), reader));
        transport
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 发送请求并等待响应，使用默认请求超时
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        self.request_with_timeout(method, params, self.request_timeout)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        if self.is_closed() {
            return Err(McpError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id,
        };
        // 读取任务可能在插入前已清空等待表
        if self.is_closed() {
            return Err(McpError::Closed);
        }

        self.write_message(&JsonRpcRequest::new(id, method, params))
            .await?;
        tracing::debug!(id, method, "mcp request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::Closed),
            Err(_) => Err(McpError::Timeout(method.to_string())),
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        if self.is_closed() {
            return Err(McpError::Closed);
        }
        self.write_message(&JsonRpcNotification::new(method, params))
            .await
    }

    async fn write_message<T: Serialize>(&self, message: &T) -> Result<(), McpError> {
        let mut line =
            serde_json::to_string(message).map_err(|e| McpError::Protocol(e.to_string()))?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            self.mark_closed();
            return Err(McpError::Io(e));
        }
        Ok(())
    }

    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let waiters: Vec<Waiter> = lock(&self.pending).drain().map(|(_, w)| w).collect();
            for waiter in waiters {
                let _ = waiter.send(Err(McpError::Closed));
            }
        }
    }

    async fn read_loop<R: AsyncRead + Unpin>(transport: Arc<Self>, reader: R) {
        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "mcp read failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_incoming(&line) {
                Ok(IncomingMessage::Response { id, outcome }) => {
                    let waiter = lock(&transport.pending).remove(&id);
                    match waiter {
                        Some(w) => {
                            let _ = w.send(outcome.map_err(|e| McpError::Rpc {
                                code: e.code,
                                message: e.message,
                            }));
                        }
                        None => tracing::warn!(id, "response for unknown request id"),
                    }
                }
                Ok(IncomingMessage::Request { id, method }) => {
                    tracing::debug!(method = %method, "rejecting server request");
                    let reply = serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": METHOD_NOT_FOUND, "message": format!("method not supported: {method}") },
                    });
                    if let Err(e) = transport.write_message(&reply).await {
                        tracing::warn!(error = %e, "failed to reject server request");
                    }
                }
                Ok(IncomingMessage::Notification { method }) => {
                    tracing::debug!(method = %method, "mcp notification");
                }
                Err(e) => tracing::warn!(error = %e, "skipping malformed mcp message"),
            }
        }
        tracing::info!("mcp server closed its output");
        transport.mark_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let (client_io, server_io) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let transport = StdioTransport::start(client_read, client_write, Duration::from_secs(2));

        let (server_read, mut server_write) = tokio::io::split(server_io);
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let reply = serde_json::json!({"jsonrpc": "2.0", "id": req["id"], "result": {"echo": req["method"]}});
                server_write
                    .write_all(format!("{}\n", reply).as_bytes())
                    .await
                    .unwrap();
            }
        });

        let result = transport.request("ping", None).await.unwrap();
        assert_eq!(result["echo"], "ping");
    }

    #[tokio::test]
    async fn test_closed_pipe_fails_pending_request() {
        let (client_io, server_io) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let transport = StdioTransport::start(client_read, client_write, Duration::from_secs(5));
        drop(server_io);

        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(err.is_disconnect(), "got {err:?}");
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (client_io, _server_io) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let transport =
            StdioTransport::start(client_read, client_write, Duration::from_millis(50));
        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout(m) if m == "tools/list"));
        assert!(lock(&transport.pending).is_empty());
    }
}
