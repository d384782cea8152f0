//! Wire types for the subset of the Telegram Bot API the channel uses.

use serde::{Deserialize, Serialize};

/// Envelope every Bot API response uses.
#[derive(Debug, Deserialize)]
pub struct TelegramResponse<T> {
    pub ok: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub result: Option<T>,
}

/// A bot or user account.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// A chat a message belongs to.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Chat {
    pub id: i64,
    /// "private", "group", "supergroup", or "channel".
    #[serde(rename = "type")]
    pub chat_type: String,
}

/// An incoming or sent message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub reply_to_message: Option<Box<TgMessage>>,
}

/// One `getUpdates` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TgMessage>,
}

/// `sendMessage` request body.
#[derive(Debug, Serialize)]
pub struct SendMessageRequest {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
}

/// `sendChatAction` request body.
#[derive(Debug, Serialize)]
pub struct SendChatActionRequest {
    pub chat_id: i64,
    pub action: &'static str,
}
