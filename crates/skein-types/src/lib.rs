//! Shared data types for the skein agent runtime.
//!
//! This crate has no dependency on other skein crates. It holds the
//! transport envelope ([`message::Message`]), conversation types consumed
//! by AI providers ([`conversation::ConversationMessage`]), the weakly
//! typed [`config::Config`] wrapper, tool invocation types
//! ([`tool::ToolResult`], [`tool::AgentTool`]), and the workspace error
//! enums ([`error::SkeinError`] and friends).

pub mod config;
pub mod conversation;
pub mod error;
pub mod message;
pub mod tool;

pub use config::Config;
pub use conversation::{CompletionOptions, CompletionResult, ConversationMessage, MessageRole, UsageStats};
pub use error::{ChannelError, MemoryError, Result, SkeinError, ToolError};
pub use message::{ChannelCapabilities, ChannelStatus, ChatType, Message, SendResult};
pub use tool::{AgentTool, AgentToolParam, ParamKind, ToolResult};
