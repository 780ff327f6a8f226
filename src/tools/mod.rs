//! 工具层：工具目录与工具调用器

pub mod catalog;
pub mod executor;

pub use catalog::{ToolCatalog, ToolCatalogAdapter};
pub use executor::{Invocation, ToolInvoker, ToolOutput};
