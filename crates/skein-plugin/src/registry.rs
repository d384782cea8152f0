//! The plugin registry: a typed multi-index over all registered plugins.
//!
//! Plugins are stored in registration order (shutdown walks it in
//! reverse) and indexed by plugin name plus capability id (channel id,
//! tool id, provider id). The registry also owns the slash-command
//! table. Registration happens during startup and is quiescent
//! afterwards; reads dominate, so the registry itself is shared as a
//! plain `Arc` and only the command table sits behind a lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};

use skein_types::{Config, Message, ToolResult};

use crate::ai::AiPlugin;
use crate::channel::ChannelPlugin;
use crate::plugin::Plugin;
use crate::tool::ToolPlugin;

/// A registered plugin, tagged by capability.
#[derive(Clone)]
pub enum PluginHandle {
    Channel(Arc<dyn ChannelPlugin>),
    Tool(Arc<dyn ToolPlugin>),
    Ai(Arc<dyn AiPlugin>),
}

impl PluginHandle {
    /// The common lifecycle view of this plugin.
    pub fn as_plugin(&self) -> &dyn Plugin {
        match self {
            PluginHandle::Channel(p) => p.as_ref(),
            PluginHandle::Tool(p) => p.as_ref(),
            PluginHandle::Ai(p) => p.as_ref(),
        }
    }

    /// Capability kind name ("channel", "tool", "ai").
    pub fn kind(&self) -> &'static str {
        match self {
            PluginHandle::Channel(_) => "channel",
            PluginHandle::Tool(_) => "tool",
            PluginHandle::Ai(_) => "ai",
        }
    }
}

/// Handler for a slash command: `(message, session_key, args) -> reply`.
///
/// An empty reply means "fall through to the agent path".
pub type CommandHandler = Arc<dyn Fn(&Message, &str, &str) -> String + Send + Sync>;

/// A registered slash command.
#[derive(Clone)]
pub struct CommandDef {
    /// Command name, including the leading `/`.
    pub command: String,
    /// Help text shown by `/help`.
    pub description: String,
    /// The handler invoked on dispatch.
    pub handler: CommandHandler,
}

impl CommandDef {
    pub fn new(
        command: impl Into<String>,
        description: impl Into<String>,
        handler: CommandHandler,
    ) -> Self {
        Self {
            command: command.into(),
            description: description.into(),
            handler,
        }
    }
}

/// Multi-index of plugins by kind and name, plus the command table.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<PluginHandle>,
    by_name: HashMap<String, usize>,
    channel_order: Vec<usize>,
    channel_ids: HashMap<String, usize>,
    tool_order: Vec<usize>,
    tool_ids: HashMap<String, usize>,
    ai_order: Vec<usize>,
    ai_ids: HashMap<String, usize>,
    commands: Mutex<HashMap<String, CommandDef>>,
}

impl PluginRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, indexing it by name and capability id.
    ///
    /// Duplicate plugin names are rejected with a warning and the
    /// plugin is dropped.
    pub fn register_plugin(&mut self, handle: PluginHandle) -> bool {
        let name = handle.as_plugin().name().to_string();
        if self.by_name.contains_key(&name) {
            warn!(plugin = %name, "duplicate plugin name, ignoring registration");
            return false;
        }

        let idx = self.plugins.len();
        debug!(plugin = %name, kind = handle.kind(), "registering plugin");
        match &handle {
            PluginHandle::Channel(c) => {
                self.channel_order.push(idx);
                self.channel_ids.insert(c.channel_id().to_string(), idx);
            }
            PluginHandle::Tool(t) => {
                self.tool_order.push(idx);
                self.tool_ids.insert(t.tool_id().to_string(), idx);
            }
            PluginHandle::Ai(a) => {
                self.ai_order.push(idx);
                self.ai_ids.insert(a.provider_id().to_string(), idx);
            }
        }
        self.by_name.insert(name, idx);
        self.plugins.push(handle);
        true
    }

    /// All plugins in registration order.
    pub fn plugins(&self) -> &[PluginHandle] {
        &self.plugins
    }

    /// Look up a plugin by name.
    pub fn get_plugin(&self, name: &str) -> Option<&PluginHandle> {
        self.by_name.get(name).map(|&i| &self.plugins[i])
    }

    /// Look up a channel by channel id.
    pub fn get_channel(&self, channel_id: &str) -> Option<Arc<dyn ChannelPlugin>> {
        self.channel_ids.get(channel_id).and_then(|&i| {
            if let PluginHandle::Channel(c) = &self.plugins[i] {
                Some(c.clone())
            } else {
                None
            }
        })
    }

    /// Look up a tool by tool id.
    pub fn get_tool(&self, tool_id: &str) -> Option<Arc<dyn ToolPlugin>> {
        self.tool_ids.get(tool_id).and_then(|&i| {
            if let PluginHandle::Tool(t) = &self.plugins[i] {
                Some(t.clone())
            } else {
                None
            }
        })
    }

    /// Look up an AI provider by provider id.
    pub fn get_ai(&self, provider_id: &str) -> Option<Arc<dyn AiPlugin>> {
        self.ai_ids.get(provider_id).and_then(|&i| {
            if let PluginHandle::Ai(a) = &self.plugins[i] {
                Some(a.clone())
            } else {
                None
            }
        })
    }

    /// All channels in registration order.
    pub fn channels(&self) -> Vec<Arc<dyn ChannelPlugin>> {
        self.channel_order
            .iter()
            .filter_map(|&i| match &self.plugins[i] {
                PluginHandle::Channel(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    /// All tools in registration order.
    pub fn tools(&self) -> Vec<Arc<dyn ToolPlugin>> {
        self.tool_order
            .iter()
            .filter_map(|&i| match &self.plugins[i] {
                PluginHandle::Tool(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    /// All AI providers in registration order.
    pub fn ai_providers(&self) -> Vec<Arc<dyn AiPlugin>> {
        self.ai_order
            .iter()
            .filter_map(|&i| match &self.plugins[i] {
                PluginHandle::Ai(a) => Some(a.clone()),
                _ => None,
            })
            .collect()
    }

    /// First provider in registration order that is both initialized and
    /// configured.
    pub fn get_default_ai(&self) -> Option<Arc<dyn AiPlugin>> {
        self.ai_providers()
            .into_iter()
            .find(|a| a.is_initialized() && a.is_configured())
    }

    /// Initialize every plugin. Each plugin's init is attempted even when
    /// an earlier one fails; returns whether all succeeded.
    pub fn init_all(&self, cfg: &Config) -> bool {
        let mut all_ok = true;
        for handle in &self.plugins {
            let plugin = handle.as_plugin();
            if let Err(e) = plugin.init(cfg) {
                warn!(plugin = %plugin.name(), error = %e, "plugin init failed");
                all_ok = false;
            }
        }
        all_ok
    }

    /// Shut down every plugin in reverse registration order.
    pub fn shutdown_all(&self) {
        for handle in self.plugins.iter().rev() {
            handle.as_plugin().shutdown();
        }
    }

    /// Start every channel; returns whether all started.
    pub async fn start_all_channels(&self) -> bool {
        let mut all_ok = true;
        for channel in self.channels() {
            if let Err(e) = channel.start().await {
                warn!(channel = %channel.channel_id(), error = %e, "channel start failed");
                all_ok = false;
            }
        }
        all_ok
    }

    /// Stop every channel.
    pub async fn stop_all_channels(&self) {
        for channel in self.channels() {
            channel.stop().await;
        }
    }

    /// Poll every channel once.
    pub async fn poll_all_channels(&self) {
        for channel in self.channels() {
            channel.poll().await;
        }
    }

    /// Poll every plugin once.
    pub async fn poll_all(&self) {
        for handle in &self.plugins {
            handle.as_plugin().poll().await;
        }
    }

    /// Broadcast an inbound message to every plugin's observer hook.
    pub async fn broadcast_incoming(&self, msg: &Message) {
        for handle in &self.plugins {
            handle.as_plugin().on_incoming_message(msg).await;
        }
    }

    /// Execute a tool action through the owning plugin.
    pub async fn execute_tool(&self, tool_id: &str, action: &str, params: &Value) -> ToolResult {
        let Some(tool) = self.get_tool(tool_id) else {
            return ToolResult::fail(format!("Tool not found: {tool_id}"));
        };
        if !tool.supports(action) {
            return ToolResult::fail(format!(
                "Tool {tool_id} does not support action: {action}"
            ));
        }
        tool.execute(action, params).await
    }

    /// Register commands, ignoring entries with empty names.
    pub fn register_commands(&self, commands: Vec<CommandDef>) {
        let mut table = self.commands.lock().expect("command table poisoned");
        for def in commands {
            if def.command.is_empty() {
                continue;
            }
            debug!(command = %def.command, "registering command");
            table.insert(def.command.clone(), def);
        }
    }

    /// Look up a command definition by name.
    pub fn get_command(&self, name: &str) -> Option<CommandDef> {
        self.commands
            .lock()
            .expect("command table poisoned")
            .get(name)
            .cloned()
    }

    /// `(command, description)` pairs sorted by command name.
    pub fn command_list(&self) -> Vec<(String, String)> {
        let table = self.commands.lock().expect("command table poisoned");
        let mut list: Vec<(String, String)> = table
            .values()
            .map(|d| (d.command.clone(), d.description.clone()))
            .collect();
        list.sort();
        list
    }

    /// Run a command handler. `None` when the command is unknown; the
    /// caller distinguishes unknown from an empty (fall-through) reply.
    pub fn execute_command(
        &self,
        name: &str,
        msg: &Message,
        session_key: &str,
        args: &str,
    ) -> Option<String> {
        let def = self.get_command(name)?;
        Some((def.handler)(msg, session_key, args))
    }
}
