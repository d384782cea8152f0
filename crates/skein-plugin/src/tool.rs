//! Tool capability contract.

use async_trait::async_trait;
use serde_json::Value;

use skein_types::{AgentTool, ToolResult};

use crate::plugin::Plugin;

/// A plugin providing one or more executable actions.
///
/// Actions are callable by users (via slash commands or skills) and by
/// the model (via `<tool_call>` markup). [`agent_tools`](ToolPlugin::agent_tools)
/// is the fine-grained schema advertised to the model; the default
/// synthesizes one generic entry per action named
/// `{tool_id}_{action}`. Tools with typed parameters override it.
#[async_trait]
pub trait ToolPlugin: Plugin {
    /// Tool identifier (e.g. `"browser"`).
    fn tool_id(&self) -> &str;

    /// Names of the actions this tool implements.
    fn actions(&self) -> Vec<String>;

    /// Execute an action with JSON parameters.
    async fn execute(&self, action: &str, params: &Value) -> ToolResult;

    /// Whether `action` is implemented.
    fn supports(&self, action: &str) -> bool {
        self.actions().iter().any(|a| a == action)
    }

    /// Capability descriptors advertised to the model.
    fn agent_tools(&self) -> Vec<AgentTool> {
        self.actions()
            .into_iter()
            .map(|action| AgentTool {
                name: format!("{}_{}", self.tool_id(), action),
                description: format!("Run the {} action of the {} tool.", action, self.tool_id()),
                params: Vec::new(),
                tool_id: self.tool_id().to_string(),
                action,
            })
            .collect()
    }
}
