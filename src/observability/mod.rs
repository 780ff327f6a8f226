//! 可观测性：tracing 日志初始化
//!
//! 日志写到 stderr，避免与 REPL 在 stdout 上的输出交错；默认 info，可通过 RUST_LOG 覆盖。
//! 工具调用审计记录使用 target `tool_audit`，可单独过滤（如 `RUST_LOG=tool_audit=info`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
