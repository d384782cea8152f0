//! Transport envelope types shared by all channels.
//!
//! [`Message`] is the inbound/outbound unit every channel plugin produces
//! and consumes. [`SendResult`], [`ChannelCapabilities`], and
//! [`ChannelStatus`] describe the channel-facing half of the plugin
//! contract.

use serde::{Deserialize, Serialize};

/// Kind of conversation a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    /// One-on-one conversation.
    #[default]
    Direct,
    /// Multi-member group chat.
    Group,
    /// Broadcast channel.
    Channel,
}

impl ChatType {
    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::Direct => "direct",
            ChatType::Group => "group",
            ChatType::Channel => "channel",
        }
    }
}

/// A message flowing between a transport and the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Message {
    /// Transport-assigned message identifier (opaque).
    pub id: String,

    /// Channel name the message arrived on (e.g. "telegram").
    pub channel: String,

    /// Sender identifier within the channel.
    pub from: String,

    /// Human-readable sender name.
    #[serde(default)]
    pub from_name: String,

    /// Recipient / chat identifier within the channel.
    pub to: String,

    /// Message text content.
    pub text: String,

    /// Kind of conversation the message belongs to.
    #[serde(default)]
    pub chat_type: ChatType,

    /// Unix timestamp (seconds).
    #[serde(default)]
    pub timestamp: i64,

    /// Identifier of the message being replied to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,

    /// URL of attached media, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

impl Message {
    /// The chat the reply should be delivered to: the `to` field when the
    /// transport filled it in, otherwise the sender.
    pub fn reply_target(&self) -> &str {
        if self.to.is_empty() {
            &self.from
        } else {
            &self.to
        }
    }
}

/// Result of sending a message through a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    /// Whether the send succeeded.
    pub success: bool,

    /// Transport-assigned identifier of the sent message.
    #[serde(default)]
    pub message_id: String,

    /// Error description on failure.
    #[serde(default)]
    pub error: String,
}

impl SendResult {
    /// Successful send carrying the transport message id.
    pub fn ok(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: message_id.into(),
            error: String::new(),
        }
    }

    /// Failed send with an error description.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: String::new(),
            error: error.into(),
        }
    }
}

/// Feature set a channel supports.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChannelCapabilities {
    pub supports_groups: bool,
    pub supports_reactions: bool,
    pub supports_media: bool,
    pub supports_edit: bool,
    pub supports_delete: bool,
    pub supports_threads: bool,
}

/// Lifecycle status of a channel plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Not yet started.
    Stopped,
    /// Currently connecting / authenticating.
    Starting,
    /// Running and processing messages.
    Running,
    /// Shutting down.
    Stopping,
    /// Encountered an error.
    Error(String),
}

impl ChannelStatus {
    /// Stable display name for logs and `/status` output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Stopped => "stopped",
            ChannelStatus::Starting => "starting",
            ChannelStatus::Running => "running",
            ChannelStatus::Stopping => "stopping",
            ChannelStatus::Error(_) => "error",
        }
    }
}
