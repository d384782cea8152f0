//! Conversation and completion types consumed by AI providers.

use serde::{Deserialize, Serialize};

/// Role of a message author in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    #[default]
    User,
    Assistant,
}

impl MessageRole {
    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation history.
///
/// Immutable once appended to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Author role.
    pub role: MessageRole,
    /// UTF-8 text content.
    pub content: String,
}

impl ConversationMessage {
    /// Create a message with an explicit role.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

/// Options for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    /// Model to use; empty means the provider default.
    pub model: String,
    /// System prompt / instructions.
    pub system_prompt: String,
    /// Maximum tokens to generate.
    pub max_tokens: i64,
    /// Sampling temperature in `[0, 1]`.
    pub temperature: f64,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            system_prompt: String::new(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Result of an AI completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionResult {
    /// Whether the request succeeded.
    pub success: bool,
    /// The model's response text.
    pub content: String,
    /// Error message on failure.
    pub error: String,
    /// Why the model stopped (e.g. "end_turn", "max_tokens").
    pub stop_reason: String,
    /// Model that produced the response.
    pub model: String,
    /// Token usage, when the provider reports it.
    pub usage: UsageStats,
}

impl CompletionResult {
    /// Successful completion with the given text.
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            ..Self::default()
        }
    }

    /// Failed completion with an error description.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_constructors() {
        assert_eq!(ConversationMessage::system("s").role, MessageRole::System);
        assert_eq!(ConversationMessage::user("u").role, MessageRole::User);
        assert_eq!(
            ConversationMessage::assistant("a").role,
            MessageRole::Assistant
        );
    }

    #[test]
    fn role_serde_lowercase() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let back: MessageRole = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(back, MessageRole::System);
    }

    #[test]
    fn conversation_message_serde_roundtrip() {
        let msg = ConversationMessage::user("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        let back: ConversationMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn completion_defaults() {
        let opts = CompletionOptions::default();
        assert_eq!(opts.max_tokens, 4096);
        assert!(opts.model.is_empty());
    }

    #[test]
    fn completion_result_constructors() {
        let ok = CompletionResult::ok("hi");
        assert!(ok.success);
        assert_eq!(ok.content, "hi");
        assert!(ok.error.is_empty());

        let fail = CompletionResult::fail("bad gateway");
        assert!(!fail.success);
        assert_eq!(fail.error, "bad gateway");
    }
}
