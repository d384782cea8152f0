//! HTTP client wrapper for the Telegram Bot API.

use reqwest::Client;
use tracing::{debug, trace};

use skein_types::ChannelError;

use super::types::{
    SendChatActionRequest, SendMessageRequest, TelegramResponse, TgMessage, Update, User,
};

/// Typed client for the Bot API subset the channel needs: `getMe`,
/// `getUpdates`, `sendMessage`, and `sendChatAction`.
pub struct TelegramClient {
    http: Client,
    /// `https://api.telegram.org/bot{token}` by default.
    base_url: String,
}

impl TelegramClient {
    /// Client for the given bot token.
    pub fn new(token: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: format!("https://api.telegram.org/bot{token}"),
        }
    }

    /// Client pointing at a custom base URL (for testing).
    #[cfg(test)]
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            http: Client::new(),
            base_url,
        }
    }

    /// Base URL used for API requests.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Verify the bot token via `getMe`.
    pub async fn get_me(&self) -> Result<User, ChannelError> {
        let url = format!("{}/getMe", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
        let body: TelegramResponse<User> = resp
            .json()
            .await
            .map_err(|e| ChannelError::AuthFailed(e.to_string()))?;
        if !body.ok {
            return Err(ChannelError::AuthFailed(
                body.description.unwrap_or_else(|| "unauthorized".into()),
            ));
        }
        body.result
            .ok_or_else(|| ChannelError::AuthFailed("missing result in response".into()))
    }

    /// Long-poll for updates starting at `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, ChannelError> {
        let url = format!(
            "{}/getUpdates?timeout={timeout_secs}&offset={offset}",
            self.base_url
        );
        trace!(url = %url, "polling for updates");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
        let body: TelegramResponse<Vec<Update>> = resp
            .json()
            .await
            .map_err(|e| ChannelError::ReceiveFailed(e.to_string()))?;
        if !body.ok {
            return Err(ChannelError::ReceiveFailed(
                body.description.unwrap_or_else(|| "unknown error".into()),
            ));
        }

        let updates = body.result.unwrap_or_default();
        if !updates.is_empty() {
            debug!(count = updates.len(), "received updates");
        }
        Ok(updates)
    }

    /// Send a text message, optionally as a reply.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<TgMessage, ChannelError> {
        let url = format!("{}/sendMessage", self.base_url);
        let req = SendMessageRequest {
            chat_id,
            text: text.to_owned(),
            reply_to_message_id: reply_to,
        };

        let resp = self
            .http
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        let body: TelegramResponse<TgMessage> = resp
            .json()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        if !body.ok {
            return Err(ChannelError::SendFailed(
                body.description.unwrap_or_else(|| "unknown error".into()),
            ));
        }
        body.result
            .ok_or_else(|| ChannelError::SendFailed("missing result in response".into()))
    }

    /// Send a "typing" chat action.
    pub async fn send_typing(&self, chat_id: i64) -> Result<(), ChannelError> {
        let url = format!("{}/sendChatAction", self.base_url);
        let req = SendChatActionRequest {
            chat_id,
            action: "typing",
        };
        self.http
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_construction() {
        let client = TelegramClient::new("123:ABC");
        assert_eq!(client.base_url(), "https://api.telegram.org/bot123:ABC");
    }

    #[test]
    fn custom_base_url() {
        let client = TelegramClient::with_base_url("http://localhost:9999".into());
        assert_eq!(client.base_url(), "http://localhost:9999");
    }
}
