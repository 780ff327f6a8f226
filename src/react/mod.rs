//! 编排层：模型调用与工具派发交替进行的主循环

pub mod events;
pub mod loop_;

pub use events::LoopEvent;
pub use loop_::{run_query, LoopResult, LoopSession};
