//! 工具目录
//!
//! 连接建立时通过 ToolEndpoint 拉取一次工具列表，按名称去重后缓存；
//! 各模型后端从目录渲染自己的 tool schema。

use std::collections::HashSet;
use std::sync::Arc;

use crate::core::ChatError;
use crate::mcp::{ToolDescriptor, ToolEndpoint};

/// 按名称唯一、保持服务器声明顺序的工具列表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
}

impl ToolCatalog {
    /// 重名工具只保留第一个
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(tools.len());
        for tool in tools {
            if seen.insert(tool.name.clone()) {
                unique.push(tool);
            } else {
                tracing::warn!(tool = %tool.name, "duplicate tool name in catalog, keeping the first");
            }
        }
        Self { tools: unique }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// 从工具端点拉取目录
pub struct ToolCatalogAdapter {
    endpoint: Arc<dyn ToolEndpoint>,
}

impl ToolCatalogAdapter {
    pub fn new(endpoint: Arc<dyn ToolEndpoint>) -> Self {
        Self { endpoint }
    }

    /// 端点无法列出工具（未握手、连接断开、协议错误）时返回 CatalogUnavailable
    pub async fn fetch(&self) -> Result<ToolCatalog, ChatError> {
        let tools = self
            .endpoint
            .list_tools()
            .await
            .map_err(|e| ChatError::CatalogUnavailable(e.to_string()))?;
        let catalog = ToolCatalog::new(tools);
        tracing::info!(tools = ?catalog.tool_names(), "tool catalog fetched");
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{CallToolResult, McpError};
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    struct FixedEndpoint(Result<Vec<ToolDescriptor>, ()>);

    #[async_trait]
    impl ToolEndpoint for FixedEndpoint {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
            self.0.clone().map_err(|_| McpError::NotInitialized)
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: &Map<String, Value>,
        ) -> Result<CallToolResult, McpError> {
            Err(McpError::Closed)
        }
    }

    fn tool(name: &str, desc: &str) -> ToolDescriptor {
        ToolDescriptor::new(name, desc, json!({"type": "object"}))
    }

    #[test]
    fn test_catalog_dedupes_by_name_keeping_first() {
        let catalog = ToolCatalog::new(vec![
            tool("get_alerts", "first"),
            tool("get_forecast", "f"),
            tool("get_alerts", "second"),
        ]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("get_alerts").unwrap().description(), "first");
        assert_eq!(catalog.tool_names(), vec!["get_alerts", "get_forecast"]);
        assert!(!catalog.contains("missing"));
    }

    #[tokio::test]
    async fn test_fetch_maps_endpoint_failure_to_catalog_unavailable() {
        let adapter = ToolCatalogAdapter::new(Arc::new(FixedEndpoint(Err(()))));
        let err = adapter.fetch().await.unwrap_err();
        assert!(matches!(err, ChatError::CatalogUnavailable(_)));
        assert!(err.is_session_fatal());
    }

    #[tokio::test]
    async fn test_fetch_ok() {
        let adapter =
            ToolCatalogAdapter::new(Arc::new(FixedEndpoint(Ok(vec![tool("clima_actual", "c")]))));
        let catalog = adapter.fetch().await.unwrap();
        assert!(catalog.contains("clima_actual"));
    }
}
