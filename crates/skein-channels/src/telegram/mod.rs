//! Telegram Bot API channel.

mod channel;
mod client;
mod types;

pub use channel::TelegramChannel;
pub use client::TelegramClient;
