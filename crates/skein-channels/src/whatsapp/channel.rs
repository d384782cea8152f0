//! WhatsApp Cloud API channel plugin.
//!
//! Webhook-shaped transport running in cooperative mode: an external
//! surface (the gateway or an HTTP frontend) feeds raw webhook payloads
//! in via [`WhatsAppChannel::inject_webhook`]; the orchestrator's
//! `poll` drains the decoded messages into the pipeline. Outbound
//! messages go through the Graph API `messages` endpoint.

use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use skein_plugin::{ChannelPlugin, ErrorCallback, MessageCallback, Plugin};
use skein_types::{
    ChannelCapabilities, ChannelError, ChannelStatus, Config, Message, Result, SendResult,
    SkeinError,
};

use super::types::{parse_webhook_payload, SendResponse, SendTextRequest};

const DEFAULT_API_URL: &str = "https://graph.facebook.com";
const DEFAULT_API_VERSION: &str = "v21.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct WhatsAppState {
    phone_number_id: String,
    access_token: String,
    api_url: String,
    api_version: String,
    allowed_numbers: Vec<String>,
    initialized: bool,
}

/// WhatsApp Cloud API channel.
pub struct WhatsAppChannel {
    http: reqwest::Client,
    state: RwLock<WhatsAppState>,
    status: RwLock<ChannelStatus>,
    inbound: Mutex<VecDeque<Message>>,
    on_message: RwLock<Option<MessageCallback>>,
    on_error: RwLock<Option<ErrorCallback>>,
}

impl Default for WhatsAppChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl WhatsAppChannel {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            state: RwLock::new(WhatsAppState::default()),
            status: RwLock::new(ChannelStatus::Stopped),
            inbound: Mutex::new(VecDeque::new()),
            on_message: RwLock::new(None),
            on_error: RwLock::new(None),
        }
    }

    /// Queue a raw Cloud webhook payload for the next poll cycle.
    /// Returns how many messages it decoded.
    pub fn inject_webhook(&self, payload: &serde_json::Value) -> usize {
        let messages = parse_webhook_payload(payload);
        let count = messages.len();
        if count > 0 {
            let mut queue = self.inbound.lock().expect("inbound queue poisoned");
            queue.extend(messages);
        }
        count
    }

    fn is_allowed(&self, sender: &str) -> bool {
        let state = self.state.read().expect("whatsapp state poisoned");
        state.allowed_numbers.is_empty() || state.allowed_numbers.iter().any(|n| n == sender)
    }
}

#[async_trait]
impl Plugin for WhatsAppChannel {
    fn name(&self) -> &str {
        "whatsapp-channel"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "WhatsApp Cloud API channel (webhook inbound, Graph API outbound)"
    }

    fn init(&self, cfg: &Config) -> Result<()> {
        let mut state = self.state.write().expect("whatsapp state poisoned");
        state.phone_number_id = cfg.get_str("whatsapp.phone_number_id", "");
        state.access_token = cfg.get_str("whatsapp.access_token", "");
        state.api_url = cfg.get_str("whatsapp.api_url", DEFAULT_API_URL);
        state.api_version = cfg.get_str("whatsapp.api_version", DEFAULT_API_VERSION);
        state.allowed_numbers = cfg
            .get_section("whatsapp.allowed_numbers")
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        if state.phone_number_id.is_empty() || state.access_token.is_empty() {
            warn!("whatsapp: phone_number_id and access_token are required");
            state.initialized = false;
            return Err(SkeinError::ConfigInvalid {
                reason: "whatsapp.phone_number_id / whatsapp.access_token missing".into(),
            });
        }
        state.initialized = true;
        info!(phone_number_id = %state.phone_number_id, "whatsapp channel initialized");
        Ok(())
    }

    fn shutdown(&self) {
        self.state
            .write()
            .expect("whatsapp state poisoned")
            .initialized = false;
    }

    fn is_initialized(&self) -> bool {
        self.state
            .read()
            .expect("whatsapp state poisoned")
            .initialized
    }

    /// Cooperative poll: drain queued webhook messages into the
    /// pipeline.
    async fn poll(&self) {
        if *self.status.read().expect("status poisoned") != ChannelStatus::Running {
            return;
        }
        let drained: Vec<Message> = {
            let mut queue = self.inbound.lock().expect("inbound queue poisoned");
            queue.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }

        let callback = self
            .on_message
            .read()
            .expect("message callback poisoned")
            .clone();
        for msg in drained {
            if !self.is_allowed(&msg.from) {
                warn!(sender = %msg.from, "message from disallowed number, ignoring");
                continue;
            }
            debug!(id = %msg.id, "whatsapp message delivered");
            if let Some(cb) = &callback {
                cb(msg);
            }
        }
    }
}

#[async_trait]
impl ChannelPlugin for WhatsAppChannel {
    fn channel_id(&self) -> &str {
        "whatsapp"
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            supports_groups: false,
            supports_reactions: true,
            supports_media: true,
            supports_edit: false,
            supports_delete: false,
            supports_threads: false,
        }
    }

    async fn start(&self) -> std::result::Result<(), ChannelError> {
        if !self.is_initialized() {
            return Err(ChannelError::NotConnected);
        }
        *self.status.write().expect("status poisoned") = ChannelStatus::Running;
        Ok(())
    }

    async fn stop(&self) {
        *self.status.write().expect("status poisoned") = ChannelStatus::Stopped;
        self.inbound.lock().expect("inbound queue poisoned").clear();
    }

    fn status(&self) -> ChannelStatus {
        self.status.read().expect("status poisoned").clone()
    }

    async fn send_message(&self, to: &str, text: &str, _reply_to: Option<&str>) -> SendResult {
        let (url, token) = {
            let state = self.state.read().expect("whatsapp state poisoned");
            if !state.initialized {
                return SendResult::fail("whatsapp channel not initialized");
            }
            (
                format!(
                    "{}/{}/{}/messages",
                    state.api_url, state.api_version, state.phone_number_id
                ),
                state.access_token.clone(),
            )
        };

        let request = SendTextRequest::new(to, text);
        let response = match self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                if let Some(cb) = self.on_error.read().expect("error callback poisoned").as_ref()
                {
                    cb("whatsapp", &e.to_string());
                }
                return SendResult::fail(format!("request failed: {e}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(200).collect();
            return SendResult::fail(format!("HTTP {status}: {excerpt}"));
        }

        match response.json::<SendResponse>().await {
            Ok(body) => SendResult::ok(
                body.messages
                    .first()
                    .map(|m| m.id.clone())
                    .unwrap_or_default(),
            ),
            Err(e) => SendResult::fail(format!("malformed response: {e}")),
        }
    }

    fn set_message_callback(&self, cb: MessageCallback) {
        *self.on_message.write().expect("message callback poisoned") = Some(cb);
    }

    fn set_error_callback(&self, cb: ErrorCallback) {
        *self.on_error.write().expect("error callback poisoned") = Some(cb);
    }
}
