//! Tool invocation types shared between the registry and the agent loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of executing a tool action.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Whether the action succeeded.
    pub success: bool,
    /// JSON payload on success.
    pub data: Value,
    /// Error description on failure.
    pub error: String,
}

impl ToolResult {
    /// Successful result carrying a JSON payload.
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: String::new(),
        }
    }

    /// Failed result with an error description.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: error.into(),
        }
    }

    /// Text rendering used when the result is fed back to the model:
    /// the error on failure, otherwise the payload (bare strings are
    /// unwrapped, everything else pretty-printed).
    pub fn render(&self) -> String {
        if !self.success {
            return self.error.clone();
        }
        match &self.data {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_default(),
        }
    }
}

/// Type tag for an [`AgentToolParam`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamKind {
    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
        }
    }
}

/// A parameter in an [`AgentTool`] schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentToolParam {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
}

impl AgentToolParam {
    /// Required parameter.
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        }
    }

    /// Optional parameter.
    pub fn optional(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
        }
    }
}

/// A capability advertised to the model.
///
/// `tool_id` + `action` form the executor handle: the agent loop resolves
/// the advertised `name` back to the owning tool plugin and the action it
/// dispatches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTool {
    /// Model-facing name (e.g. `browser_fetch`).
    pub name: String,
    /// Human description shown in the tool catalog.
    pub description: String,
    /// Parameter schema.
    pub params: Vec<AgentToolParam>,
    /// Owning tool plugin id.
    pub tool_id: String,
    /// Action the owning plugin dispatches for this entry.
    pub action: String,
}
