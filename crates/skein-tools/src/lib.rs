//! Tool plugins: web browsing, memory, and workspace files.
//!
//! Each tool implements `ToolPlugin` and advertises typed
//! [`AgentTool`](skein_types::AgentTool) schemas to the model.

pub mod browser;
pub mod file_tool;
pub mod memory_tool;

pub use browser::BrowserTool;
pub use file_tool::FileTool;
pub use memory_tool::MemoryTool;
