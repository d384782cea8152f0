//! The common plugin lifecycle contract.

use async_trait::async_trait;

use skein_types::{Config, Message, Result};

/// Lifecycle contract every plugin implements.
///
/// Plugins are created, initialized once with the application config,
/// optionally polled from the orchestrator loop, and shut down in
/// reverse registration order. Plugins are stored behind `Arc`, so
/// mutable state lives behind interior mutability.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable plugin name, unique within the registry.
    fn name(&self) -> &str;

    /// Plugin version string.
    fn version(&self) -> &str {
        "0.1.0"
    }

    /// One-line human description.
    fn description(&self) -> &str {
        ""
    }

    /// Initialize from configuration. Failure is reported but does not
    /// stop peers from initializing.
    fn init(&self, cfg: &Config) -> Result<()>;

    /// Release resources. Must be idempotent.
    fn shutdown(&self);

    /// Whether `init` has completed successfully.
    fn is_initialized(&self) -> bool;

    /// Cooperative poll, called periodically by the orchestrator loop.
    async fn poll(&self) {}

    /// Observe every inbound message (e.g. the gateway broadcasts them).
    async fn on_incoming_message(&self, _msg: &Message) {}

    /// Typing-indicator hook; channels that support it override this.
    async fn on_typing_indicator(&self, _channel: &str, _chat: &str, _typing: bool) {}
}
