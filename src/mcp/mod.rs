//! MCP 工具端点：stdio 传输、协议消息与会话
//!
//! 编排层只依赖 [`ToolEndpoint`]，测试中可替换为桩实现。

pub mod error;
pub mod mock;
pub mod protocol;
pub mod session;
pub mod transport;

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use error::McpError;
pub use mock::{MockBehavior, MockToolEndpoint};
pub use protocol::{CallToolResult, ContentItem, ToolDescriptor};
pub use session::{connect, ServerKind, Session};
pub use transport::StdioTransport;

/// 工具端点：列出可调用工具、按名称与参数调用工具
#[async_trait]
pub trait ToolEndpoint: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<CallToolResult, McpError>;

    /// 端点是否仍可用；默认认为始终可用
    fn is_connected(&self) -> bool {
        true
    }
}
