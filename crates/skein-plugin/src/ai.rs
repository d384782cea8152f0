//! AI-provider capability contract.

use async_trait::async_trait;

use skein_types::{CompletionOptions, CompletionResult, ConversationMessage};

use crate::plugin::Plugin;

/// A language-model provider.
///
/// Providers handle the protocol details of one backend (authentication,
/// request formatting, response parsing). Providers that return native
/// structured tool calls normalize them into `<tool_call>` markup inside
/// the returned content so the agent loop sees a single surface.
#[async_trait]
pub trait AiPlugin: Plugin {
    /// Provider identifier (e.g. `"claude"`, `"llamacpp"`).
    fn provider_id(&self) -> &str;

    /// Models this provider can serve.
    fn available_models(&self) -> Vec<String>;

    /// Model used when the request does not name one.
    fn default_model(&self) -> String;

    /// Whether the provider has the credentials/endpoint it needs.
    fn is_configured(&self) -> bool;

    /// Single-prompt completion.
    async fn complete(&self, prompt: &str, opts: &CompletionOptions) -> CompletionResult {
        self.chat(&[ConversationMessage::user(prompt)], opts).await
    }

    /// Conversation completion with full history.
    async fn chat(
        &self,
        messages: &[ConversationMessage],
        opts: &CompletionOptions,
    ) -> CompletionResult;
}
