//! WebSocket gateway channel.

mod channel;
mod protocol;

pub use channel::GatewayChannel;
pub use protocol::{ClientFrame, ServerFrame};
