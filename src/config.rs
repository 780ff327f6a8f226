//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MCP_CHAT__*` 覆盖（双下划线表示嵌套，如 `MCP_CHAT__LLM__PROVIDER=openai`）。
//! 模型 API Key 不进配置文件，启动时由 [`Credentials::from_env`] 一次性读取后显式传给模型适配器。

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub server: ServerSection,
}

/// [app] 段：工具轮数上限、是否跨提问保留历史
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 单次提问内最多允许的工具调用轮数
    pub max_rounds: usize,
    /// 为 true 时同一 REPL 会话内的多次提问共享对话历史
    pub keep_history: bool,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            max_rounds: 8,
            keep_history: false,
        }
    }
}

/// 模型后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    Anthropic,
    Openai,
    OpenaiResponses,
    Deepseek,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Anthropic => "anthropic",
            Provider::Openai => "openai",
            Provider::OpenaiResponses => "openai-responses",
            Provider::Deepseek => "deepseek",
        };
        f.write_str(name)
    }
}

/// [llm] 段：后端选择、模型名、输出上限与请求超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: Provider,
    /// 未设置时使用各后端默认模型
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: Provider::Anthropic,
            model: None,
            base_url: None,
            max_tokens: 1000,
            request_timeout_secs: 60,
        }
    }
}

/// [tools] 段：单次工具调用超时、同轮工具是否并发派发
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub tool_timeout_secs: u64,
    pub parallel_calls: bool,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            parallel_calls: false,
        }
    }
}

/// [server] 段：启动工具服务器的解释器与 MCP 请求超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub python_command: String,
    pub node_command: String,
    pub request_timeout_secs: u64,
    pub client_name: String,
    pub client_version: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            python_command: "python".to_string(),
            node_command: "node".to_string(),
            request_timeout_secs: 60,
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// 各后端 API Key，启动时从进程环境读取；缺失不报错，首次模型调用时才以 MissingApiKey 失败
#[derive(Clone, Default)]
pub struct Credentials {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub deepseek_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let openai = read("OPENAI_API_KEY");
        Self {
            anthropic_api_key: read("ANTHROPIC_API_KEY"),
            deepseek_api_key: read("DEEPSEEK_API_KEY").or_else(|| openai.clone()),
            openai_api_key: openai,
        }
    }

    pub fn for_provider(&self, provider: Provider) -> Option<String> {
        match provider {
            Provider::Anthropic => self.anthropic_api_key.clone(),
            Provider::Openai | Provider::OpenaiResponses => self.openai_api_key.clone(),
            Provider::Deepseek => self.deepseek_api_key.clone(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |k: &Option<String>| if k.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("anthropic_api_key", &mask(&self.anthropic_api_key))
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("deepseek_api_key", &mask(&self.deepseek_api_key))
            .finish()
    }
}

/// 从 config 目录加载配置，环境变量 MCP_CHAT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MCP_CHAT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MCP_CHAT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.max_rounds, 8);
        assert!(!cfg.app.keep_history);
        assert_eq!(cfg.llm.provider, Provider::Anthropic);
        assert_eq!(cfg.llm.max_tokens, 1000);
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
        assert_eq!(cfg.server.python_command, "python");
    }

    #[test]
    fn test_load_config_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[app]\nmax_rounds = 3\n\n[llm]\nprovider = \"openai-responses\"\nmodel = \"gpt-4.1-nano\"\n\n[tools]\ntool_timeout_secs = 5"
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.app.max_rounds, 3);
        assert_eq!(cfg.llm.provider, Provider::OpenaiResponses);
        assert_eq!(cfg.llm.model.as_deref(), Some("gpt-4.1-nano"));
        assert_eq!(cfg.tools.tool_timeout_secs, 5);
        // 未出现的段保持默认值
        assert_eq!(cfg.server.node_command, "node");
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials {
            anthropic_api_key: Some("sk-secret".to_string()),
            ..Credentials::default()
        };
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("<set>"));
        assert_eq!(creds.for_provider(Provider::Anthropic).as_deref(), Some("sk-secret"));
        assert!(creds.for_provider(Provider::Openai).is_none());
    }
}
