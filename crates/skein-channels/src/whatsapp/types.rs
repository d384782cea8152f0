//! WhatsApp Cloud API payload types and webhook decoding.
//!
//! Inbound messages arrive in the Cloud webhook envelope:
//!
//! ```json
//! {
//!   "entry": [{
//!     "changes": [{
//!       "value": {
//!         "messages": [{
//!           "id": "wamid...",
//!           "from": "15551234567",
//!           "timestamp": "1700000000",
//!           "type": "text",
//!           "text": {"body": "hello"}
//!         }],
//!         "contacts": [{"wa_id": "15551234567", "profile": {"name": "Ada"}}]
//!       }
//!     }]
//!   }]
//! }
//! ```
//!
//! This is the only inbound shape the channel accepts; bridge-style
//! flat payloads are not handled.

use serde::{Deserialize, Serialize};

use skein_types::{ChatType, Message};

/// Outbound `messages` request body.
#[derive(Debug, Serialize)]
pub struct SendTextRequest {
    pub messaging_product: &'static str,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub text: TextBody,
}

#[derive(Debug, Serialize)]
pub struct TextBody {
    pub body: String,
}

impl SendTextRequest {
    pub fn new(to: &str, body: &str) -> Self {
        Self {
            messaging_product: "whatsapp",
            to: to.to_string(),
            message_type: "text",
            text: TextBody {
                body: body.to_string(),
            },
        }
    }
}

/// Outbound send response.
#[derive(Debug, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub messages: Vec<SentMessageId>,
}

#[derive(Debug, Deserialize)]
pub struct SentMessageId {
    pub id: String,
}

// ── Webhook envelope ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
struct WebhookEntry {
    #[serde(default)]
    changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
struct WebhookChange {
    #[serde(default)]
    value: WebhookValue,
}

#[derive(Debug, Deserialize, Default)]
struct WebhookValue {
    #[serde(default)]
    messages: Vec<WebhookMessage>,
    #[serde(default)]
    contacts: Vec<WebhookContact>,
}

#[derive(Debug, Deserialize)]
struct WebhookMessage {
    #[serde(default)]
    id: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    timestamp: String,
    #[serde(rename = "type", default)]
    message_type: String,
    #[serde(default)]
    text: Option<WebhookText>,
}

#[derive(Debug, Deserialize)]
struct WebhookText {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct WebhookContact {
    #[serde(default)]
    wa_id: String,
    #[serde(default)]
    profile: Option<WebhookProfile>,
}

#[derive(Debug, Deserialize, Default)]
struct WebhookProfile {
    #[serde(default)]
    name: String,
}

/// Decode a Cloud webhook payload into transport envelopes.
///
/// Non-text messages are skipped. WhatsApp DMs map to
/// [`ChatType::Direct`] with the sender's number as both peer and chat.
pub fn parse_webhook_payload(payload: &serde_json::Value) -> Vec<Message> {
    let Ok(parsed) = serde_json::from_value::<WebhookPayload>(payload.clone()) else {
        return Vec::new();
    };

    let mut messages = Vec::new();
    for entry in parsed.entry {
        for change in entry.changes {
            let names: std::collections::HashMap<&str, &str> = change
                .value
                .contacts
                .iter()
                .filter_map(|c| {
                    c.profile
                        .as_ref()
                        .map(|p| (c.wa_id.as_str(), p.name.as_str()))
                })
                .collect();

            for msg in &change.value.messages {
                if msg.message_type != "text" {
                    continue;
                }
                let Some(text) = &msg.text else { continue };
                if text.body.is_empty() {
                    continue;
                }
                messages.push(Message {
                    id: msg.id.clone(),
                    channel: "whatsapp".into(),
                    from: msg.from.clone(),
                    from_name: names.get(msg.from.as_str()).unwrap_or(&"").to_string(),
                    to: msg.from.clone(),
                    text: text.body.clone(),
                    chat_type: ChatType::Direct,
                    timestamp: msg.timestamp.parse().unwrap_or(0),
                    reply_to_id: None,
                    media_url: None,
                });
            }
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn webhook(messages: serde_json::Value, contacts: serde_json::Value) -> serde_json::Value {
        json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": messages,
                        "contacts": contacts
                    }
                }]
            }]
        })
    }

    #[test]
    fn decodes_text_message_with_contact_name() {
        let payload = webhook(
            json!([{
                "id": "wamid.1",
                "from": "15551234567",
                "timestamp": "1700000000",
                "type": "text",
                "text": {"body": "hello"}
            }]),
            json!([{"wa_id": "15551234567", "profile": {"name": "Ada"}}]),
        );
        let messages = parse_webhook_payload(&payload);
        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert_eq!(msg.id, "wamid.1");
        assert_eq!(msg.channel, "whatsapp");
        assert_eq!(msg.from, "15551234567");
        assert_eq!(msg.from_name, "Ada");
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.chat_type, ChatType::Direct);
        assert_eq!(msg.timestamp, 1_700_000_000);
    }

    #[test]
    fn skips_non_text_messages() {
        let payload = webhook(
            json!([{
                "id": "wamid.2",
                "from": "1",
                "timestamp": "0",
                "type": "image"
            }]),
            json!([]),
        );
        assert!(parse_webhook_payload(&payload).is_empty());
    }

    #[test]
    fn tolerates_empty_and_malformed_payloads() {
        assert!(parse_webhook_payload(&json!({})).is_empty());
        assert!(parse_webhook_payload(&json!({"entry": []})).is_empty());
        assert!(parse_webhook_payload(&json!("not an object")).is_empty());
    }

    #[test]
    fn send_request_shape() {
        let req = SendTextRequest::new("15551234567", "hi");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messaging_product"], "whatsapp");
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"]["body"], "hi");
    }
}
