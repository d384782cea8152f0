//! Channel plugins: Telegram (long poll), WhatsApp Cloud API
//! (cooperative poll over webhook payloads), and the WebSocket gateway.
//!
//! Each transport picks its polling shape at init and commits to it:
//! Telegram long-polls on a dedicated task it owns (joined in `stop`),
//! WhatsApp drains an internal queue from the orchestrator's
//! cooperative `poll`, and the gateway runs its own accept loop.

pub mod gateway;
pub mod telegram;
pub mod whatsapp;

pub use gateway::GatewayChannel;
pub use telegram::TelegramChannel;
pub use whatsapp::WhatsAppChannel;
