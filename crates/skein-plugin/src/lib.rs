//! Plugin contracts, registry, and dynamic loader for skein.
//!
//! Three capability contracts extend the common [`Plugin`] lifecycle:
//!
//! - [`ChannelPlugin`] -- transports (Telegram, WhatsApp, gateway)
//! - [`ToolPlugin`] -- executable actions callable by users and the model
//! - [`AiPlugin`] -- language-model providers
//!
//! [`PluginRegistry`] is the typed multi-index over all registered
//! plugins plus the slash-command table. [`PluginLoader`] loads plugins
//! from shared libraries through the C ABI declared in [`abi`].

pub mod abi;
pub mod ai;
pub mod channel;
pub mod loader;
pub mod plugin;
pub mod registry;
pub mod tool;

pub use abi::LoadedPluginInfo;
pub use ai::AiPlugin;
pub use channel::{ChannelPlugin, ErrorCallback, MessageCallback};
pub use loader::PluginLoader;
pub use plugin::Plugin;
pub use registry::{CommandDef, CommandHandler, PluginHandle, PluginRegistry};
pub use tool::ToolPlugin;
