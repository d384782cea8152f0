//! JSON frames of the gateway WebSocket protocol.
//!
//! Clients authenticate with a `hello` carrying the shared token, then
//! exchange `chat.send` / `chat.reply` frames. Inbound messages from
//! other channels are broadcast to authenticated clients as `message`
//! events.

use serde::{Deserialize, Serialize};

/// Frames a client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Authenticate with the shared gateway token.
    #[serde(rename = "hello")]
    Hello {
        #[serde(default)]
        token: String,
        #[serde(default)]
        client_id: String,
    },

    /// Send a chat message into the agent pipeline.
    #[serde(rename = "chat.send")]
    ChatSend {
        text: String,
        #[serde(default)]
        sender_id: String,
    },

    /// Liveness probe.
    #[serde(rename = "ping")]
    Ping,
}

/// Frames the server sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Authentication accepted.
    #[serde(rename = "hello.ok")]
    HelloOk { conn_id: String },

    /// Protocol or authentication error.
    #[serde(rename = "error")]
    Error { message: String },

    /// Reply to a `chat.send`.
    #[serde(rename = "chat.reply")]
    ChatReply { text: String },

    /// Liveness response.
    #[serde(rename = "pong")]
    Pong,

    /// Broadcast of an inbound message seen on any channel.
    #[serde(rename = "message")]
    MessageEvent {
        channel: String,
        from: String,
        chat_id: String,
        text: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_roundtrip() {
        let hello: ClientFrame =
            serde_json::from_str(r#"{"type": "hello", "token": "secret"}"#).unwrap();
        assert_eq!(
            hello,
            ClientFrame::Hello {
                token: "secret".into(),
                client_id: String::new()
            }
        );

        let send: ClientFrame =
            serde_json::from_str(r#"{"type": "chat.send", "text": "hi"}"#).unwrap();
        assert_eq!(
            send,
            ClientFrame::ChatSend {
                text: "hi".into(),
                sender_id: String::new()
            }
        );

        assert_eq!(
            serde_json::from_str::<ClientFrame>(r#"{"type": "ping"}"#).unwrap(),
            ClientFrame::Ping
        );
    }

    #[test]
    fn server_frames_tag_names() {
        let json = serde_json::to_string(&ServerFrame::HelloOk {
            conn_id: "c1".into(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"hello.ok""#));

        let json = serde_json::to_string(&ServerFrame::ChatReply { text: "ok".into() }).unwrap();
        assert!(json.contains(r#""type":"chat.reply""#));
    }

    #[test]
    fn unknown_frame_type_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type": "bogus"}"#).is_err());
    }
}
