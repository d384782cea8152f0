//! Built-in slash commands.

use std::sync::{Arc, Weak};

use skein_plugin::{CommandDef, PluginRegistry};
use skein_types::Config;

use crate::session::SessionStore;

/// Register the core command set (`/ping`, `/help`, `/info`, `/start`,
/// `/new`, `/status`, `/tools`) with the registry's command table.
///
/// Handlers hold a weak registry reference; the command table lives
/// inside the registry, so a strong one would cycle.
pub fn register_core_commands(
    cfg: &Config,
    registry: &Arc<PluginRegistry>,
    sessions: Arc<SessionStore>,
) {
    let app_name = cfg.get_str("bot.app_name", "skein");
    let app_version = cfg.get_str("bot.app_version", env!("CARGO_PKG_VERSION"));

    let weak: Weak<PluginRegistry> = Arc::downgrade(registry);

    let help_registry = weak.clone();
    let status_registry = weak.clone();
    let tools_registry = weak;
    let status_sessions = sessions.clone();
    let new_sessions = sessions;
    let info_line = format!("{app_name} v{app_version}");
    let start_line = format!(
        "Hello! I'm {app_name}. Send me a message to chat, or /help to see commands."
    );

    registry.register_commands(vec![
        CommandDef::new("/ping", "Health check", Arc::new(|_msg, _key, _args| "pong".into())),
        CommandDef::new(
            "/help",
            "List available commands",
            Arc::new(move |_msg, _key, _args| {
                let Some(registry) = help_registry.upgrade() else {
                    return String::new();
                };
                let mut out = String::from("Available commands:\n");
                for (command, description) in registry.command_list() {
                    out.push_str(&format!("{command} - {description}\n"));
                }
                out.trim_end().to_string()
            }),
        ),
        CommandDef::new(
            "/info",
            "Show bot name and version",
            Arc::new(move |_msg, _key, _args| info_line.clone()),
        ),
        CommandDef::new(
            "/start",
            "Show the welcome message",
            Arc::new(move |_msg, _key, _args| start_line.clone()),
        ),
        CommandDef::new(
            "/new",
            "Start a new conversation",
            Arc::new(move |_msg, key, _args| {
                new_sessions.with_session(key, |s| s.clear_history());
                "Started a new conversation.".into()
            }),
        ),
        CommandDef::new(
            "/status",
            "Show runtime status",
            Arc::new(move |_msg, _key, _args| {
                let Some(registry) = status_registry.upgrade() else {
                    return String::new();
                };
                let mut out = format!(
                    "Sessions: {}\nPlugins: {}\n",
                    status_sessions.len(),
                    registry.plugins().len()
                );
                for channel in registry.channels() {
                    out.push_str(&format!(
                        "Channel {}: {}\n",
                        channel.channel_id(),
                        channel.status().as_str()
                    ));
                }
                out.trim_end().to_string()
            }),
        ),
        CommandDef::new(
            "/tools",
            "List tools available to the agent",
            Arc::new(move |_msg, _key, _args| {
                let Some(registry) = tools_registry.upgrade() else {
                    return String::new();
                };
                let mut tools = registry.tools();
                if tools.is_empty() {
                    return "No tools registered.".into();
                }
                tools.sort_by(|a, b| a.tool_id().cmp(b.tool_id()));
                let mut out = String::from("Available tools:\n");
                for tool in tools {
                    for agent_tool in tool.agent_tools() {
                        out.push_str(&format!(
                            "{} - {}\n",
                            agent_tool.name, agent_tool.description
                        ));
                    }
                }
                out.trim_end().to_string()
            }),
        ),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_key::DmScope;
    use skein_types::{ConversationMessage, Message};

    fn setup() -> (Arc<PluginRegistry>, Arc<SessionStore>) {
        let registry = Arc::new(PluginRegistry::new());
        let sessions = Arc::new(SessionStore::new(DmScope::Main, 20));
        register_core_commands(&Config::empty(), &registry, sessions.clone());
        (registry, sessions)
    }

    #[test]
    fn ping_pongs() {
        let (registry, _sessions) = setup();
        let out = registry.execute_command("/ping", &Message::default(), "k", "");
        assert_eq!(out.as_deref(), Some("pong"));
    }

    #[test]
    fn help_lists_all_commands() {
        let (registry, _sessions) = setup();
        let out = registry
            .execute_command("/help", &Message::default(), "k", "")
            .unwrap();
        for cmd in ["/ping", "/help", "/info", "/start", "/new", "/status", "/tools"] {
            assert!(out.contains(cmd), "missing {cmd} in: {out}");
        }
    }

    #[test]
    fn info_uses_config_identity() {
        let registry = Arc::new(PluginRegistry::new());
        let sessions = Arc::new(SessionStore::new(DmScope::Main, 20));
        let cfg =
            Config::load_str(r#"{"bot": {"app_name": "testbot", "app_version": "9.9"}}"#).unwrap();
        register_core_commands(&cfg, &registry, sessions);

        let out = registry
            .execute_command("/info", &Message::default(), "k", "")
            .unwrap();
        assert_eq!(out, "testbot v9.9");
    }

    #[test]
    fn new_clears_session_history() {
        let (registry, sessions) = setup();
        sessions.add_message("agent:default:main", ConversationMessage::user("hi"));
        assert_eq!(sessions.history("agent:default:main").len(), 1);

        registry
            .execute_command("/new", &Message::default(), "agent:default:main", "")
            .unwrap();
        assert!(sessions.history("agent:default:main").is_empty());
    }

    #[test]
    fn status_reports_counts() {
        let (registry, sessions) = setup();
        sessions.with_session("agent:default:main", |_| {});
        let out = registry
            .execute_command("/status", &Message::default(), "k", "")
            .unwrap();
        assert!(out.contains("Sessions: 1"));
        assert!(out.contains("Plugins: 0"));
    }

    #[test]
    fn tools_empty_registry() {
        let (registry, _sessions) = setup();
        let out = registry
            .execute_command("/tools", &Message::default(), "k", "")
            .unwrap();
        assert_eq!(out, "No tools registered.");
    }
}
