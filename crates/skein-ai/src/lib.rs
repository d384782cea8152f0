//! AI provider plugins.
//!
//! [`ClaudeAi`] speaks the Anthropic Messages API; [`LlamaCppAi`]
//! speaks the OpenAI chat-completions format served by llama.cpp and
//! compatible endpoints. Both normalize their responses into plain
//! [`CompletionResult`](skein_types::CompletionResult) text, converting
//! native structured tool calls into `<tool_call>` markup so the agent
//! loop sees a single surface.

pub mod claude;
pub mod openai_compat;

pub use claude::ClaudeAi;
pub use openai_compat::LlamaCppAi;
