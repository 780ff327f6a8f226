//! 交互层：行式 REPL（读取提问、打印工具调用轨迹与最终回答）

pub mod repl;

pub use repl::{run_repl, run_repl_with, ReplExit};
