//! The agentic tool-execution loop.
//!
//! Feeds a conversation to the default AI provider, scans the reply for
//! `<tool_call name="X">{json}</tool_call>` blocks, executes them
//! left-to-right through the plugin registry, injects
//! `<tool_result name="X" success="...">` blocks back as a synthetic
//! user turn, and iterates until the model stops calling tools or the
//! step budget runs out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use skein_plugin::PluginRegistry;
use skein_types::{AgentTool, CompletionOptions, Config, ConversationMessage};

use crate::monitor::AiMonitor;

/// Default bound on model calls per message.
pub const DEFAULT_MAX_STEPS: usize = 8;
/// Default per-step timeout.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 120;

/// Reply sent when no AI provider is configured.
pub const AI_NOT_CONFIGURED: &str = "AI not configured.";
/// Prefix of error-tagged replies.
pub const AI_ERROR_PREFIX: &str = "AI error:";

/// One executed tool call.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub name: String,
    pub params: Value,
    pub success: bool,
    pub output: String,
}

/// Result of driving the loop for one user message.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Final reply text, tool-call markup stripped.
    pub reply: String,
    /// Why the loop stopped: `end_turn`, `max_steps`, `timeout`,
    /// `error`, `no_provider`, or a provider stop reason.
    pub stop_reason: String,
    /// Tool calls executed along the way.
    pub tool_calls: Vec<ToolCallRecord>,
    /// False when the reply is an error surrogate; the caller then
    /// rolls back the user turn instead of persisting it.
    pub success: bool,
}

impl AgentOutcome {
    fn failed(reply: impl Into<String>, stop_reason: &str, tool_calls: Vec<ToolCallRecord>) -> Self {
        Self {
            reply: reply.into(),
            stop_reason: stop_reason.into(),
            tool_calls,
            success: false,
        }
    }
}

/// The agent loop configuration plus its collaborators.
pub struct AgentLoop {
    registry: Arc<PluginRegistry>,
    monitor: Arc<AiMonitor>,
    max_steps: usize,
    step_timeout: Duration,
}

impl AgentLoop {
    pub fn new(registry: Arc<PluginRegistry>, monitor: Arc<AiMonitor>) -> Self {
        Self {
            registry,
            monitor,
            max_steps: DEFAULT_MAX_STEPS,
            step_timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
        }
    }

    /// Apply `agent.max_steps` and `agent.step_timeout_secs` from config.
    pub fn with_config(mut self, cfg: &Config) -> Self {
        self.max_steps = cfg.get_i64("agent.max_steps", DEFAULT_MAX_STEPS as i64).max(0) as usize;
        self.step_timeout = Duration::from_secs(
            cfg.get_i64(
                "agent.step_timeout_secs",
                DEFAULT_STEP_TIMEOUT_SECS as i64,
            )
            .max(1) as u64,
        );
        self
    }

    /// Override the step budget.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Override the per-step timeout.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// The configured step budget.
    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// All advertised agent tools, ordered by owning tool id.
    fn collect_agent_tools(&self) -> Vec<AgentTool> {
        let mut tools = self.registry.tools();
        tools.sort_by(|a, b| a.tool_id().cmp(b.tool_id()));
        tools.iter().flat_map(|t| t.agent_tools()).collect()
    }

    /// Drive the loop for one user message.
    ///
    /// `history` is the session history so far (the new user text is
    /// appended internally). The returned outcome carries the final
    /// reply and the executed tool calls.
    pub async fn run(
        &self,
        session_id: &str,
        channel: &str,
        chat_id: &str,
        history: &[ConversationMessage],
        user_text: &str,
        system_base: &str,
    ) -> AgentOutcome {
        let Some(ai) = self.registry.get_default_ai() else {
            return AgentOutcome::failed(AI_NOT_CONFIGURED, "no_provider", Vec::new());
        };

        let agent_tools = self.collect_agent_tools();
        let resolution = build_resolution_map(&agent_tools);

        let mut system = system_base.trim_end().to_string();
        if !agent_tools.is_empty() {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(&render_tool_catalog(&agent_tools));
        }

        let mut messages: Vec<ConversationMessage> = history.to_vec();
        messages.push(ConversationMessage::user(user_text));

        let opts = CompletionOptions {
            system_prompt: system,
            ..CompletionOptions::default()
        };

        self.monitor.begin(session_id, channel, chat_id);
        let outcome = self
            .run_steps(&*ai, session_id, &mut messages, &opts, &resolution)
            .await;
        self.monitor.end(session_id);
        outcome
    }

    async fn run_steps(
        &self,
        ai: &dyn skein_plugin::AiPlugin,
        session_id: &str,
        messages: &mut Vec<ConversationMessage>,
        opts: &CompletionOptions,
        resolution: &HashMap<String, (String, String)>,
    ) -> AgentOutcome {
        let total_steps = self.max_steps.max(1);
        let mut records: Vec<ToolCallRecord> = Vec::new();

        for step in 0..total_steps {
            let result = match tokio::time::timeout(self.step_timeout, ai.chat(messages, opts))
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(session_id, step, "model call exceeded step timeout");
                    return AgentOutcome::failed(
                        format!("{AI_ERROR_PREFIX} step timed out"),
                        "timeout",
                        records,
                    );
                }
            };

            if !result.success {
                return AgentOutcome::failed(
                    format!("{AI_ERROR_PREFIX} {}", result.error),
                    "error",
                    records,
                );
            }

            let calls = extract_tool_calls(&result.content);
            if calls.is_empty() {
                let stop_reason = if result.stop_reason.is_empty() {
                    "end_turn".to_string()
                } else {
                    result.stop_reason.clone()
                };
                return AgentOutcome {
                    reply: strip_tool_markup(&result.content),
                    stop_reason,
                    tool_calls: records,
                    success: true,
                };
            }

            self.monitor.heartbeat(session_id);
            debug!(session_id, step, count = calls.len(), "executing tool calls");

            let mut result_blocks: Vec<String> = Vec::with_capacity(calls.len());
            for (name, raw_params) in &calls {
                let (tool_result, params) = self
                    .execute_call(name, raw_params, resolution)
                    .await;
                let body = tool_result.render();
                result_blocks.push(format!(
                    "<tool_result name=\"{}\" success=\"{}\">\n{}\n</tool_result>",
                    name, tool_result.success, body
                ));
                records.push(ToolCallRecord {
                    name: name.clone(),
                    params,
                    success: tool_result.success,
                    output: body,
                });
            }

            if step + 1 >= total_steps {
                debug!(session_id, "step budget exhausted");
                return AgentOutcome {
                    reply: strip_tool_markup(&result.content),
                    stop_reason: "max_steps".into(),
                    tool_calls: records,
                    success: true,
                };
            }

            messages.push(ConversationMessage::assistant(result.content.clone()));
            messages.push(ConversationMessage::user(result_blocks.join("\n")));
        }

        // The final iteration always returns via the budget branch.
        AgentOutcome::failed(
            format!("{AI_ERROR_PREFIX} loop ended unexpectedly"),
            "error",
            records,
        )
    }

    /// Resolve an advertised name to `(tool_id, action)` and execute.
    async fn execute_call(
        &self,
        name: &str,
        raw_params: &str,
        resolution: &HashMap<String, (String, String)>,
    ) -> (skein_types::ToolResult, Value) {
        let params: Value = if raw_params.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(raw_params) {
                Ok(v) => v,
                Err(e) => {
                    return (
                        skein_types::ToolResult::fail(format!(
                            "Invalid tool parameters for {name}: {e}"
                        )),
                        Value::Null,
                    );
                }
            }
        };

        let resolved = resolution
            .get(name)
            .cloned()
            .or_else(|| {
                name.split_once('_')
                    .map(|(tool_id, action)| (tool_id.to_string(), action.to_string()))
            });

        let Some((tool_id, action)) = resolved else {
            return (
                skein_types::ToolResult::fail(format!("Unknown tool: {name}")),
                params,
            );
        };

        let result = self.registry.execute_tool(&tool_id, &action, &params).await;
        (result, params)
    }
}

/// Model-facing name -> `(tool_id, action)`.
fn build_resolution_map(tools: &[AgentTool]) -> HashMap<String, (String, String)> {
    tools
        .iter()
        .map(|t| (t.name.clone(), (t.tool_id.clone(), t.action.clone())))
        .collect()
}

/// Render the deterministic tool catalog appended to the system prompt.
///
/// Stable across restarts for an unchanged tool set: tools are ordered
/// by owning tool id and each entry lists its parameters in declared
/// order.
pub fn render_tool_catalog(tools: &[AgentTool]) -> String {
    let mut out = String::from(
        "## Tools\n\n\
         You can call the tools listed below. To call one, include a block\n\
         in your reply using exactly this format:\n\n\
         <tool_call name=\"TOOL_NAME\">\n\
         {\"parameter\": \"value\"}\n\
         </tool_call>\n\n\
         Results arrive in <tool_result> blocks in the next user turn.\n",
    );
    for tool in tools {
        out.push_str(&format!("\n### {}\n{}\n", tool.name, tool.description));
        if !tool.params.is_empty() {
            out.push_str("Parameters:\n");
            for p in &tool.params {
                out.push_str(&format!(
                    "- {} ({}, {}): {}\n",
                    p.name,
                    p.kind.as_str(),
                    if p.required { "required" } else { "optional" },
                    p.description
                ));
            }
        }
    }
    out
}

fn tool_call_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<tool_call\s+name="([^"]+)"\s*>\s*(.*?)\s*</tool_call>"#)
            .expect("tool call regex")
    })
}

/// Extract `(name, raw-json-params)` pairs, left to right.
pub fn extract_tool_calls(content: &str) -> Vec<(String, String)> {
    tool_call_regex()
        .captures_iter(content)
        .map(|cap| (cap[1].to_string(), cap[2].to_string()))
        .collect()
}

/// Remove tool-call markup, collapsing the leftover whitespace.
pub fn strip_tool_markup(content: &str) -> String {
    let stripped = tool_call_regex().replace_all(content, "");
    let mut out = String::with_capacity(stripped.len());
    let mut blank_run = 0usize;
    for line in stripped.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_types::{AgentToolParam, ParamKind};

    fn sample_tools() -> Vec<AgentTool> {
        vec![
            AgentTool {
                name: "browser_fetch".into(),
                description: "Fetch a URL and return the content.".into(),
                params: vec![AgentToolParam::required(
                    "url",
                    ParamKind::String,
                    "The URL to fetch",
                )],
                tool_id: "browser".into(),
                action: "fetch".into(),
            },
            AgentTool {
                name: "memory_search".into(),
                description: "Search memory.".into(),
                params: vec![
                    AgentToolParam::required("query", ParamKind::String, "Search query"),
                    AgentToolParam::optional("max_results", ParamKind::Integer, "Result cap"),
                ],
                tool_id: "memory".into(),
                action: "memory_search".into(),
            },
        ]
    }

    #[test]
    fn extract_single_call() {
        let content = "Let me look that up.\n<tool_call name=\"browser_fetch\">\n{\"url\": \"http://x\"}\n</tool_call>";
        let calls = extract_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "browser_fetch");
        assert_eq!(calls[0].1, "{\"url\": \"http://x\"}");
    }

    #[test]
    fn extract_multiple_calls_in_order() {
        let content = concat!(
            "<tool_call name=\"a_one\">{}</tool_call>",
            " text between ",
            "<tool_call name=\"b_two\">{\"x\":1}</tool_call>",
        );
        let calls = extract_tool_calls(content);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "a_one");
        assert_eq!(calls[1].0, "b_two");
    }

    #[test]
    fn extract_none_from_plain_text() {
        assert!(extract_tool_calls("just a normal reply").is_empty());
        assert!(extract_tool_calls("<tool_result name=\"x\" success=\"true\">y</tool_result>")
            .is_empty());
    }

    #[test]
    fn strip_removes_markup_keeps_text() {
        let content = "Here you go.\n\n<tool_call name=\"browser_fetch\">\n{\"url\":\"u\"}\n</tool_call>\n\nDone.";
        assert_eq!(strip_tool_markup(content), "Here you go.\n\nDone.");
        assert_eq!(strip_tool_markup("plain"), "plain");
    }

    #[test]
    fn catalog_is_deterministic_and_complete() {
        let tools = sample_tools();
        let a = render_tool_catalog(&tools);
        let b = render_tool_catalog(&tools);
        assert_eq!(a, b);
        assert!(a.contains("### browser_fetch"));
        assert!(a.contains("- url (string, required): The URL to fetch"));
        assert!(a.contains("- max_results (integer, optional): Result cap"));
        assert!(a.contains("<tool_call name=\"TOOL_NAME\">"));
    }

    #[test]
    fn step_budget_defaults_to_eight() {
        assert_eq!(DEFAULT_MAX_STEPS, 8);

        let agent = AgentLoop::new(
            Arc::new(PluginRegistry::new()),
            Arc::new(AiMonitor::default()),
        );
        assert_eq!(agent.max_steps(), 8);

        let cfg = skein_types::Config::load_str(r#"{"agent": {"max_steps": 3}}"#).unwrap();
        assert_eq!(agent.with_config(&cfg).max_steps(), 3);
    }

    #[test]
    fn resolution_map_routes_names() {
        let map = build_resolution_map(&sample_tools());
        assert_eq!(
            map.get("browser_fetch"),
            Some(&("browser".to_string(), "fetch".to_string()))
        );
        assert_eq!(
            map.get("memory_search"),
            Some(&("memory".to_string(), "memory_search".to_string()))
        );
    }
}
