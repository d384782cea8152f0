//! Inbound message handling.
//!
//! Each delivered message is debounced by id, routed to its session,
//! and classified: slash command, skill command, or free-form text for
//! the agent loop. The reply always goes back through the originating
//! channel; internal failures surface as short error-marked strings
//! rather than silence.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use skein_plugin::PluginRegistry;
use skein_types::{Config, ConversationMessage, Message};

use crate::agent::AgentLoop;
use crate::ratelimit::MessageDebouncer;
use crate::session::SessionStore;
use crate::skills::SkillSet;

/// Default debounce window for transport retries, seconds.
pub const DEFAULT_DEBOUNCE_SECONDS: i64 = 5;

/// Reply prefix for internal handler failures.
const ERROR_MARKER: &str = "Error:";

/// Routes inbound messages to commands, skills, or the agent loop.
pub struct MessageHandler {
    registry: Arc<PluginRegistry>,
    sessions: Arc<SessionStore>,
    skills: Arc<SkillSet>,
    agent: AgentLoop,
    debouncer: Mutex<MessageDebouncer>,
    system_prompt: String,
    agent_id: String,
}

impl MessageHandler {
    pub fn new(
        registry: Arc<PluginRegistry>,
        sessions: Arc<SessionStore>,
        skills: Arc<SkillSet>,
        agent: AgentLoop,
        cfg: &Config,
    ) -> Self {
        Self {
            registry,
            sessions,
            skills,
            agent,
            debouncer: Mutex::new(MessageDebouncer::new(
                cfg.get_i64("debounce_seconds", DEFAULT_DEBOUNCE_SECONDS),
            )),
            system_prompt: cfg.get_str("agent.system_prompt", ""),
            agent_id: cfg.get_str("agent.id", "default"),
        }
    }

    /// Whether this message id passed the debounce window.
    pub fn should_process(&self, msg: &Message) -> bool {
        self.debouncer
            .lock()
            .expect("debouncer poisoned")
            .should_process(&msg.id)
    }

    /// Process one inbound message end to end.
    pub async fn handle(&self, msg: Message) {
        if !self.should_process(&msg) {
            debug!(id = %msg.id, channel = %msg.channel, "duplicate message, debounced");
            return;
        }

        self.registry.broadcast_incoming(&msg).await;

        let key = self.sessions.key_for_message(&msg, &self.agent_id);
        let agent_id = self.agent_id.clone();
        self.sessions.with_session(&key, |s| {
            s.agent_id = agent_id;
            s.channel = msg.channel.clone();
            s.peer_id = msg.from.clone();
        });

        let reply = if msg.text.starts_with('/') {
            match self.dispatch_slash(&msg, &key).await {
                Some(reply) => reply,
                // Unknown command or empty handler output falls through
                // to the agent path.
                None => self.run_agent(&msg, &key).await,
            }
        } else {
            self.run_agent(&msg, &key).await
        };

        self.send_reply(&msg, &reply).await;
    }

    /// Try command and skill dispatch. `None` means fall through.
    async fn dispatch_slash(&self, msg: &Message, key: &str) -> Option<String> {
        let (command, args) = match msg.text.split_once(char::is_whitespace) {
            Some((head, tail)) => (head, tail.trim()),
            None => (msg.text.as_str(), ""),
        };

        if let Some(reply) = self.registry.execute_command(command, msg, key, args) {
            debug!(command, "command dispatched");
            if reply.is_empty() {
                return None;
            }
            return Some(reply);
        }

        if let Some((skill, skill_args)) = self.skills.resolve_command(&msg.text) {
            debug!(skill = %skill.name, "skill command dispatched");
            let dispatch = skill.dispatch.as_ref()?;
            return Some(self.run_skill_tool(&dispatch.tool_name, &skill_args).await);
        }

        None
    }

    /// Execute a skill's tool dispatch with raw arguments.
    ///
    /// The raw text binds to the tool's first required parameter when
    /// its schema declares one, otherwise to `input`.
    async fn run_skill_tool(&self, tool_name: &str, args: &str) -> String {
        let advertised = self
            .registry
            .tools()
            .iter()
            .flat_map(|t| t.agent_tools())
            .find(|t| t.name == tool_name);

        let (tool_id, action, param) = match advertised {
            Some(tool) => {
                let param = tool
                    .params
                    .iter()
                    .find(|p| p.required)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| "input".to_string());
                (tool.tool_id, tool.action, param)
            }
            None => match tool_name.split_once('_') {
                Some((tool_id, action)) => {
                    (tool_id.to_string(), action.to_string(), "input".to_string())
                }
                None => return format!("{ERROR_MARKER} unknown skill tool {tool_name}"),
            },
        };

        let mut params = serde_json::Map::new();
        params.insert(param, serde_json::Value::String(args.to_string()));
        let result = self
            .registry
            .execute_tool(&tool_id, &action, &serde_json::Value::Object(params))
            .await;
        if result.success {
            result.render()
        } else {
            format!("{ERROR_MARKER} {}", result.error)
        }
    }

    /// Free-form path: run the agent loop and persist the turn.
    async fn run_agent(&self, msg: &Message, key: &str) -> String {
        let mut system = self.system_prompt.clone();
        if let Some(section) = self.skills.prompt_section() {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(&section);
        }

        let history = self.sessions.history(key);
        let outcome = self
            .agent
            .run(
                key,
                &msg.channel,
                msg.reply_target(),
                &history,
                &msg.text,
                &system,
            )
            .await;

        // Failed runs (model error, timeout) do not persist the user
        // turn, so a retried message starts from the same state.
        if outcome.success {
            self.sessions
                .add_message(key, ConversationMessage::user(msg.text.clone()));
            self.sessions
                .add_message(key, ConversationMessage::assistant(outcome.reply.clone()));
        }

        if outcome.reply.is_empty() {
            format!("{ERROR_MARKER} the agent produced no reply")
        } else {
            outcome.reply
        }
    }

    /// Deliver a reply through the originating channel.
    async fn send_reply(&self, msg: &Message, reply: &str) {
        let Some(channel) = self.registry.get_channel(&msg.channel) else {
            warn!(channel = %msg.channel, "no channel registered for reply");
            return;
        };
        let result = channel.send_message(msg.reply_target(), reply, None).await;
        if !result.success {
            warn!(
                channel = %msg.channel,
                to = %msg.reply_target(),
                error = %result.error,
                "failed to send reply"
            );
        }
    }
}
