//! Channel capability contract.

use std::sync::Arc;

use async_trait::async_trait;

use skein_types::{ChannelCapabilities, ChannelError, ChannelStatus, Message, SendResult};

use crate::plugin::Plugin;

/// Callback invoked for each inbound message a channel produces.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Callback invoked when a channel hits an error: `(channel_id, error)`.
pub type ErrorCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// A transport-facing plugin for one external messaging system.
///
/// Lifecycle: after `init`, the orchestrator calls [`start`](ChannelPlugin::start).
/// Long-poll transports spawn their own polling task inside `start` and
/// join it in [`stop`](ChannelPlugin::stop); webhook-shaped transports run
/// cooperatively from [`Plugin::poll`]. Inbound messages are emitted
/// through the callback installed with
/// [`set_message_callback`](ChannelPlugin::set_message_callback).
#[async_trait]
pub trait ChannelPlugin: Plugin {
    /// Channel identifier (e.g. `"telegram"`).
    fn channel_id(&self) -> &str;

    /// Feature set this channel supports.
    fn capabilities(&self) -> ChannelCapabilities;

    /// Begin receiving messages. Returns once the channel is running
    /// (any polling loop runs on a task the channel owns).
    async fn start(&self) -> std::result::Result<(), ChannelError>;

    /// Stop receiving messages, joining any owned polling task.
    async fn stop(&self);

    /// Current lifecycle status.
    fn status(&self) -> ChannelStatus;

    /// Send a text message to a chat, optionally as a reply.
    async fn send_message(&self, to: &str, text: &str, reply_to: Option<&str>) -> SendResult;

    /// Install the inbound-message callback.
    fn set_message_callback(&self, cb: MessageCallback);

    /// Install the error callback.
    fn set_error_callback(&self, cb: ErrorCallback);
}
