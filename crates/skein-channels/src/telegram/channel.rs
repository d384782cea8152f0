//! Telegram channel plugin.
//!
//! Long-poll transport: `start` verifies the bot token and spawns a
//! polling task the channel owns; `stop` cancels the task and joins it.
//! The cooperative `poll` hook is a no-op for this channel.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use skein_plugin::{ChannelPlugin, ErrorCallback, MessageCallback, Plugin};
use skein_types::{
    ChannelCapabilities, ChannelError, ChannelStatus, ChatType, Config, Message, Result,
    SendResult, SkeinError,
};

use super::client::TelegramClient;
use super::types::{TgMessage, Update};

/// Long-poll timeout for `getUpdates`, seconds.
const POLL_TIMEOUT_SECS: u64 = 30;
/// Delay before retrying after a poll error, seconds.
const ERROR_RETRY_DELAY_SECS: u64 = 5;

/// Telegram Bot API channel.
pub struct TelegramChannel {
    client: RwLock<Option<Arc<TelegramClient>>>,
    allowed_users: RwLock<Vec<String>>,
    status: RwLock<ChannelStatus>,
    initialized: RwLock<bool>,
    offset: Arc<AtomicI64>,
    cancel: Mutex<Option<CancellationToken>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    on_message: RwLock<Option<MessageCallback>>,
    on_error: RwLock<Option<ErrorCallback>>,
}

impl Default for TelegramChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl TelegramChannel {
    pub fn new() -> Self {
        Self {
            client: RwLock::new(None),
            allowed_users: RwLock::new(Vec::new()),
            status: RwLock::new(ChannelStatus::Stopped),
            initialized: RwLock::new(false),
            offset: Arc::new(AtomicI64::new(0)),
            cancel: Mutex::new(None),
            task: tokio::sync::Mutex::new(None),
            on_message: RwLock::new(None),
            on_error: RwLock::new(None),
        }
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.write().expect("status poisoned") = status;
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        let allowed = self.allowed_users.read().expect("allow-list poisoned");
        allowed.is_empty() || allowed.iter().any(|id| id == sender_id)
    }

    fn emit_error(&self, error: &str) {
        if let Some(cb) = self.on_error.read().expect("error callback poisoned").as_ref() {
            cb("telegram", error);
        }
    }
}

/// Convert one Telegram message into the transport envelope.
fn to_envelope(update_id: i64, msg: &TgMessage) -> Option<Message> {
    let text = msg.text.clone()?;
    let chat_type = match msg.chat.chat_type.as_str() {
        "private" => ChatType::Direct,
        "group" | "supergroup" => ChatType::Group,
        "channel" => ChatType::Channel,
        other => {
            debug!(chat_type = other, "unknown chat type, treating as direct");
            ChatType::Direct
        }
    };

    Some(Message {
        id: format!("tg-{update_id}"),
        channel: "telegram".into(),
        from: msg
            .from
            .as_ref()
            .map(|u| u.id.to_string())
            .unwrap_or_default(),
        from_name: msg
            .from
            .as_ref()
            .map(|u| u.first_name.clone())
            .unwrap_or_default(),
        to: msg.chat.id.to_string(),
        text,
        chat_type,
        timestamp: msg.date,
        reply_to_id: msg
            .reply_to_message
            .as_ref()
            .map(|m| m.message_id.to_string()),
        media_url: None,
    })
}

async fn poll_loop(
    client: Arc<TelegramClient>,
    offset: Arc<AtomicI64>,
    allowed_users: Vec<String>,
    on_message: Option<MessageCallback>,
    cancel: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.get_updates(offset.load(Ordering::SeqCst), POLL_TIMEOUT_SECS) => result,
        };

        match result {
            Ok(updates) => {
                for update in updates {
                    // Advance past this update whether or not it
                    // yields a message.
                    offset.store(update.update_id + 1, Ordering::SeqCst);
                    handle_update(&update, &allowed_users, on_message.as_ref());
                }
            }
            Err(e) => {
                error!(error = %e, "getUpdates failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(ERROR_RETRY_DELAY_SECS)) => {}
                }
            }
        }
    }
    info!("telegram poll loop exited");
}

fn handle_update(update: &Update, allowed_users: &[String], on_message: Option<&MessageCallback>) {
    let Some(tg_msg) = &update.message else {
        debug!(update_id = update.update_id, "skipping non-message update");
        return;
    };
    let Some(envelope) = to_envelope(update.update_id, tg_msg) else {
        debug!(update_id = update.update_id, "skipping message without text");
        return;
    };
    if !allowed_users.is_empty() && !allowed_users.iter().any(|id| id == &envelope.from) {
        warn!(sender = %envelope.from, "message from disallowed user, ignoring");
        return;
    }
    if let Some(cb) = on_message {
        cb(envelope);
    }
}

#[async_trait]
impl Plugin for TelegramChannel {
    fn name(&self) -> &str {
        "telegram-channel"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Telegram Bot API channel using long polling"
    }

    fn init(&self, cfg: &Config) -> Result<()> {
        let token = cfg.get_str("telegram.bot_token", "");
        if token.is_empty() {
            warn!("telegram: no bot token configured (set telegram.bot_token)");
            return Err(SkeinError::ConfigInvalid {
                reason: "telegram.bot_token missing".into(),
            });
        }

        let allowed: Vec<String> = cfg
            .get_section("telegram.allowed_users")
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|v| match v {
                        serde_json::Value::String(s) => Some(s.clone()),
                        serde_json::Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        *self.client.write().expect("client poisoned") = Some(Arc::new(TelegramClient::new(&token)));
        *self.allowed_users.write().expect("allow-list poisoned") = allowed;
        *self.initialized.write().expect("initialized poisoned") = true;
        info!("telegram channel initialized");
        Ok(())
    }

    fn shutdown(&self) {
        *self.initialized.write().expect("initialized poisoned") = false;
    }

    fn is_initialized(&self) -> bool {
        *self.initialized.read().expect("initialized poisoned")
    }

    async fn on_typing_indicator(&self, _channel: &str, chat: &str, typing: bool) {
        if !typing {
            return;
        }
        let client = self.client.read().expect("client poisoned").clone();
        if let (Some(client), Ok(chat_id)) = (client, chat.parse::<i64>()) {
            if let Err(e) = client.send_typing(chat_id).await {
                debug!(error = %e, "sendChatAction failed");
            }
        }
    }
}

#[async_trait]
impl ChannelPlugin for TelegramChannel {
    fn channel_id(&self) -> &str {
        "telegram"
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            supports_groups: true,
            supports_reactions: true,
            supports_media: true,
            supports_edit: true,
            supports_delete: true,
            supports_threads: false,
        }
    }

    async fn start(&self) -> std::result::Result<(), ChannelError> {
        let Some(client) = self.client.read().expect("client poisoned").clone() else {
            return Err(ChannelError::NotConnected);
        };
        self.set_status(ChannelStatus::Starting);

        let me = match client.get_me().await {
            Ok(me) => me,
            Err(e) => {
                self.set_status(ChannelStatus::Error(e.to_string()));
                self.emit_error(&e.to_string());
                return Err(e);
            }
        };
        info!(bot_id = me.id, bot_name = %me.first_name, "telegram bot authenticated");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            client,
            self.offset.clone(),
            self.allowed_users.read().expect("allow-list poisoned").clone(),
            self.on_message.read().expect("message callback poisoned").clone(),
            cancel.clone(),
        ));

        *self.cancel.lock().expect("cancel poisoned") = Some(cancel);
        *self.task.lock().await = Some(task);
        self.set_status(ChannelStatus::Running);
        Ok(())
    }

    async fn stop(&self) {
        self.set_status(ChannelStatus::Stopping);
        if let Some(cancel) = self.cancel.lock().expect("cancel poisoned").take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        self.set_status(ChannelStatus::Stopped);
    }

    fn status(&self) -> ChannelStatus {
        self.status.read().expect("status poisoned").clone()
    }

    async fn send_message(&self, to: &str, text: &str, reply_to: Option<&str>) -> SendResult {
        let Some(client) = self.client.read().expect("client poisoned").clone() else {
            return SendResult::fail("telegram channel not initialized");
        };
        let Ok(chat_id) = to.parse::<i64>() else {
            return SendResult::fail(format!("invalid chat id '{to}': expected i64"));
        };
        let reply_to = match reply_to.map(str::parse::<i64>) {
            None => None,
            Some(Ok(id)) => Some(id),
            Some(Err(_)) => None,
        };

        match client.send_message(chat_id, text, reply_to).await {
            Ok(sent) => SendResult::ok(sent.message_id.to_string()),
            Err(e) => {
                self.emit_error(&e.to_string());
                SendResult::fail(e.to_string())
            }
        }
    }

    fn set_message_callback(&self, cb: MessageCallback) {
        *self.on_message.write().expect("message callback poisoned") = Some(cb);
    }

    fn set_error_callback(&self, cb: ErrorCallback) {
        *self.on_error.write().expect("error callback poisoned") = Some(cb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::types::{Chat, User};

    fn tg_message(chat_type: &str, text: Option<&str>) -> TgMessage {
        TgMessage {
            message_id: 7,
            chat: Chat {
                id: 100,
                chat_type: chat_type.into(),
            },
            from: Some(User {
                id: 200,
                first_name: "Ada".into(),
                username: Some("ada".into()),
            }),
            text: text.map(String::from),
            date: 1_700_000_000,
            reply_to_message: None,
        }
    }

    #[test]
    fn envelope_from_private_chat() {
        let msg = to_envelope(42, &tg_message("private", Some("hello"))).unwrap();
        assert_eq!(msg.id, "tg-42");
        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.from, "200");
        assert_eq!(msg.to, "100");
        assert_eq!(msg.chat_type, ChatType::Direct);
        assert_eq!(msg.text, "hello");
    }

    #[test]
    fn envelope_chat_type_mapping() {
        assert_eq!(
            to_envelope(1, &tg_message("supergroup", Some("x"))).unwrap().chat_type,
            ChatType::Group
        );
        assert_eq!(
            to_envelope(1, &tg_message("channel", Some("x"))).unwrap().chat_type,
            ChatType::Channel
        );
    }

    #[test]
    fn textless_message_skipped() {
        assert!(to_envelope(1, &tg_message("private", None)).is_none());
    }

    #[test]
    fn init_requires_token() {
        let channel = TelegramChannel::new();
        std::env::remove_var("TELEGRAM_BOT_TOKEN");
        assert!(channel.init(&Config::empty()).is_err());
        assert!(!channel.is_initialized());

        let cfg = Config::load_str(r#"{"telegram": {"bot_token": "123:ABC"}}"#).unwrap();
        channel.init(&cfg).unwrap();
        assert!(channel.is_initialized());
        assert_eq!(channel.status(), ChannelStatus::Stopped);
    }

    #[test]
    fn allow_list_parsed_from_config() {
        let channel = TelegramChannel::new();
        let cfg = Config::load_str(
            r#"{"telegram": {"bot_token": "t", "allowed_users": ["1", 2]}}"#,
        )
        .unwrap();
        channel.init(&cfg).unwrap();
        assert!(channel.is_allowed("1"));
        assert!(channel.is_allowed("2"));
        assert!(!channel.is_allowed("3"));
    }

    #[tokio::test]
    async fn send_rejects_bad_chat_id() {
        let channel = TelegramChannel::new();
        let cfg = Config::load_str(r#"{"telegram": {"bot_token": "t"}}"#).unwrap();
        channel.init(&cfg).unwrap();
        let result = channel.send_message("not-a-number", "hi", None).await;
        assert!(!result.success);
        assert!(result.error.contains("invalid chat id"));
    }
}
