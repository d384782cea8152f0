//! WebSocket gateway channel plugin.
//!
//! Accepts WebSocket connections on a configurable port, authenticates
//! clients against a shared token, feeds their `chat.send` frames into
//! the pipeline as channel `"gateway"` messages, and routes replies
//! back to the originating connection. All inbound messages observed on
//! the bus are broadcast to authenticated clients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skein_plugin::{ChannelPlugin, ErrorCallback, MessageCallback, Plugin};
use skein_types::{
    ChannelCapabilities, ChannelError, ChannelStatus, ChatType, Config, Message, Result,
    SendResult,
};

use super::protocol::{ClientFrame, ServerFrame};

/// Default gateway port.
const DEFAULT_PORT: i64 = 18789;

type ClientMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<String>>>>;

#[derive(Default)]
struct GatewayState {
    bind_host: String,
    port: u16,
    auth_token: String,
    initialized: bool,
}

/// WebSocket gateway channel.
pub struct GatewayChannel {
    state: RwLock<GatewayState>,
    status: RwLock<ChannelStatus>,
    /// Authenticated connections, keyed by connection id.
    clients: ClientMap,
    conn_counter: Arc<AtomicU64>,
    /// Actual bound port (differs from config when configured as 0).
    bound_port: AtomicU16,
    cancel: Mutex<Option<CancellationToken>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    on_message: RwLock<Option<MessageCallback>>,
    on_error: RwLock<Option<ErrorCallback>>,
}

impl Default for GatewayChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayChannel {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GatewayState::default()),
            status: RwLock::new(ChannelStatus::Stopped),
            clients: Arc::new(Mutex::new(HashMap::new())),
            conn_counter: Arc::new(AtomicU64::new(0)),
            bound_port: AtomicU16::new(0),
            cancel: Mutex::new(None),
            task: tokio::sync::Mutex::new(None),
            on_message: RwLock::new(None),
            on_error: RwLock::new(None),
        }
    }

    /// The port the listener actually bound to.
    pub fn bound_port(&self) -> u16 {
        self.bound_port.load(Ordering::SeqCst)
    }

    /// Number of authenticated clients.
    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("client map poisoned").len()
    }

    fn broadcast(&self, frame: &ServerFrame) {
        let Ok(text) = serde_json::to_string(frame) else {
            return;
        };
        let clients = self.clients.lock().expect("client map poisoned");
        for sender in clients.values() {
            let _ = sender.send(text.clone());
        }
    }
}

/// Per-connection protocol loop.
async fn handle_connection(
    stream: TcpStream,
    conn_id: String,
    auth_token: String,
    clients: ClientMap,
    on_message: Option<MessageCallback>,
    cancel: CancellationToken,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(error = %e, "websocket handshake failed");
            return;
        }
    };
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut authenticated = false;

    debug!(conn_id = %conn_id, "gateway client connected");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            outbound = rx.recv() => {
                let Some(text) = outbound else { break };
                if sink.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            inbound = source.next() => {
                let Some(Ok(msg)) = inbound else { break };
                let Ok(text) = msg.to_text() else { continue };
                if text.is_empty() {
                    continue;
                }

                let frame = match serde_json::from_str::<ClientFrame>(text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        let reply = ServerFrame::Error {
                            message: format!("invalid frame: {e}"),
                        };
                        let _ = tx.send(serde_json::to_string(&reply).unwrap_or_default());
                        continue;
                    }
                };

                let reply = match frame {
                    ClientFrame::Hello { token, .. } => {
                        if token == auth_token {
                            authenticated = true;
                            clients
                                .lock()
                                .expect("client map poisoned")
                                .insert(conn_id.clone(), tx.clone());
                            ServerFrame::HelloOk {
                                conn_id: conn_id.clone(),
                            }
                        } else {
                            warn!(conn_id = %conn_id, "gateway auth failed");
                            ServerFrame::Error {
                                message: "authentication failed".into(),
                            }
                        }
                    }
                    ClientFrame::Ping => ServerFrame::Pong,
                    ClientFrame::ChatSend { text, sender_id } => {
                        if !authenticated {
                            ServerFrame::Error {
                                message: "not authenticated".into(),
                            }
                        } else {
                            let envelope = Message {
                                id: format!("gw-{}", uuid::Uuid::new_v4()),
                                channel: "gateway".into(),
                                from: if sender_id.is_empty() {
                                    conn_id.clone()
                                } else {
                                    sender_id
                                },
                                from_name: String::new(),
                                to: conn_id.clone(),
                                text,
                                chat_type: ChatType::Direct,
                                timestamp: chrono::Utc::now().timestamp(),
                                reply_to_id: None,
                                media_url: None,
                            };
                            if let Some(cb) = &on_message {
                                cb(envelope);
                            }
                            continue;
                        }
                    }
                };
                let _ = tx.send(serde_json::to_string(&reply).unwrap_or_default());
            }
        }
    }

    clients.lock().expect("client map poisoned").remove(&conn_id);
    debug!(conn_id = %conn_id, "gateway client disconnected");
}

#[async_trait]
impl Plugin for GatewayChannel {
    fn name(&self) -> &str {
        "gateway-channel"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "WebSocket gateway for remote agent control"
    }

    fn init(&self, cfg: &Config) -> Result<()> {
        let mut state = self.state.write().expect("gateway state poisoned");
        state.bind_host = cfg.get_str("gateway.bind", "127.0.0.1");
        state.port = cfg.get_i64("gateway.port", DEFAULT_PORT).clamp(0, 65535) as u16;
        state.auth_token = cfg.get_str("gateway.auth_token", "");
        state.initialized = true;
        info!(bind = %state.bind_host, port = state.port, "gateway channel initialized");
        Ok(())
    }

    fn shutdown(&self) {
        self.state
            .write()
            .expect("gateway state poisoned")
            .initialized = false;
    }

    fn is_initialized(&self) -> bool {
        self.state
            .read()
            .expect("gateway state poisoned")
            .initialized
    }

    /// Broadcast inbound traffic from every channel to gateway clients.
    async fn on_incoming_message(&self, msg: &Message) {
        if msg.channel == "gateway" {
            return;
        }
        self.broadcast(&ServerFrame::MessageEvent {
            channel: msg.channel.clone(),
            from: msg.from.clone(),
            chat_id: msg.to.clone(),
            text: msg.text.clone(),
        });
    }
}

#[async_trait]
impl ChannelPlugin for GatewayChannel {
    fn channel_id(&self) -> &str {
        "gateway"
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            supports_groups: false,
            supports_reactions: false,
            supports_media: false,
            supports_edit: false,
            supports_delete: false,
            supports_threads: false,
        }
    }

    async fn start(&self) -> std::result::Result<(), ChannelError> {
        let (bind_host, port, auth_token) = {
            let state = self.state.read().expect("gateway state poisoned");
            if !state.initialized {
                return Err(ChannelError::NotConnected);
            }
            (state.bind_host.clone(), state.port, state.auth_token.clone())
        };

        *self.status.write().expect("status poisoned") = ChannelStatus::Starting;
        let listener = TcpListener::bind((bind_host.as_str(), port))
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
        let bound = listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(port);
        self.bound_port.store(bound, Ordering::SeqCst);
        info!(port = bound, "gateway listening");

        let cancel = CancellationToken::new();
        let accept_cancel = cancel.clone();
        let clients = self.clients.clone();
        let conn_counter = self.conn_counter.clone();
        let on_message = self
            .on_message
            .read()
            .expect("message callback poisoned")
            .clone();
        let on_error = self
            .on_error
            .read()
            .expect("error callback poisoned")
            .clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        let (stream, addr) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                if let Some(cb) = &on_error {
                                    cb("gateway", &e.to_string());
                                }
                                continue;
                            }
                        };
                        let conn_id = format!(
                            "conn-{}",
                            conn_counter.fetch_add(1, Ordering::SeqCst)
                        );
                        debug!(conn_id = %conn_id, peer = %addr, "gateway connection accepted");
                        tokio::spawn(handle_connection(
                            stream,
                            conn_id,
                            auth_token.clone(),
                            clients.clone(),
                            on_message.clone(),
                            accept_cancel.child_token(),
                        ));
                    }
                }
            }
            info!("gateway accept loop exited");
        });

        *self.cancel.lock().expect("cancel poisoned") = Some(cancel);
        *self.task.lock().await = Some(task);
        *self.status.write().expect("status poisoned") = ChannelStatus::Running;
        Ok(())
    }

    async fn stop(&self) {
        *self.status.write().expect("status poisoned") = ChannelStatus::Stopping;
        if let Some(cancel) = self.cancel.lock().expect("cancel poisoned").take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        self.clients.lock().expect("client map poisoned").clear();
        *self.status.write().expect("status poisoned") = ChannelStatus::Stopped;
    }

    fn status(&self) -> ChannelStatus {
        self.status.read().expect("status poisoned").clone()
    }

    /// Route a reply to the originating connection.
    async fn send_message(&self, to: &str, text: &str, _reply_to: Option<&str>) -> SendResult {
        let sender = self
            .clients
            .lock()
            .expect("client map poisoned")
            .get(to)
            .cloned();
        let Some(sender) = sender else {
            return SendResult::fail(format!("no connected client: {to}"));
        };

        let frame = ServerFrame::ChatReply {
            text: text.to_string(),
        };
        match serde_json::to_string(&frame) {
            Ok(ref json) if sender.send(json.clone()).is_ok() => SendResult::ok(to),
            Ok(_) => SendResult::fail("client connection closed"),
            Err(e) => SendResult::fail(e.to_string()),
        }
    }

    fn set_message_callback(&self, cb: MessageCallback) {
        *self.on_message.write().expect("message callback poisoned") = Some(cb);
    }

    fn set_error_callback(&self, cb: ErrorCallback) {
        *self.on_error.write().expect("error callback poisoned") = Some(cb);
    }
}
