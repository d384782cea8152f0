//! WhatsApp Cloud API channel.

mod channel;
mod types;

pub use channel::WhatsAppChannel;
pub use types::parse_webhook_payload;
