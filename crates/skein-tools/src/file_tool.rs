//! Workspace file tool: read, write, and list files with path
//! containment.

use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use skein_plugin::{Plugin, ToolPlugin};
use skein_types::{AgentTool, AgentToolParam, Config, ParamKind, Result, ToolResult};

/// Cap on file content returned to the model, bytes.
const MAX_READ_BYTES: usize = 65_536;

/// File operations restricted to the workspace root.
pub struct FileTool {
    workspace: RwLock<Option<PathBuf>>,
}

impl Default for FileTool {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTool {
    pub fn new() -> Self {
        Self {
            workspace: RwLock::new(None),
        }
    }

    /// Resolve a workspace-relative path, rejecting absolute paths and
    /// parent-directory traversal.
    fn resolve(&self, rel: &str) -> std::result::Result<PathBuf, String> {
        let workspace = self
            .workspace
            .read()
            .expect("workspace poisoned")
            .clone()
            .ok_or_else(|| "file tool not initialized".to_string())?;

        let candidate = Path::new(rel);
        if candidate.is_absolute() {
            return Err(format!("absolute paths are not allowed: {rel}"));
        }
        for component in candidate.components() {
            if matches!(component, Component::ParentDir) {
                return Err(format!("path escapes the workspace: {rel}"));
            }
        }
        Ok(workspace.join(candidate))
    }

    fn do_read(&self, params: &Value) -> ToolResult {
        let Some(rel) = params.get("path").and_then(Value::as_str) else {
            return ToolResult::fail("missing 'path' parameter");
        };
        let path = match self.resolve(rel) {
            Ok(p) => p,
            Err(e) => return ToolResult::fail(e),
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let truncated = content.len() > MAX_READ_BYTES;
                let content = if truncated {
                    let mut end = MAX_READ_BYTES;
                    while end < content.len() && !content.is_char_boundary(end) {
                        end += 1;
                    }
                    content[..end].to_string()
                } else {
                    content
                };
                ToolResult::ok(json!({
                    "path": rel,
                    "content": content,
                    "truncated": truncated,
                }))
            }
            Err(e) => ToolResult::fail(format!("failed to read {rel}: {e}")),
        }
    }

    fn do_write(&self, params: &Value) -> ToolResult {
        let Some(rel) = params.get("path").and_then(Value::as_str) else {
            return ToolResult::fail("missing 'path' parameter");
        };
        let Some(content) = params.get("content").and_then(Value::as_str) else {
            return ToolResult::fail("missing 'content' parameter");
        };
        let path = match self.resolve(rel) {
            Ok(p) => p,
            Err(e) => return ToolResult::fail(e),
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::fail(format!("failed to create directories: {e}"));
            }
        }
        match std::fs::write(&path, content) {
            Ok(()) => ToolResult::ok(json!({
                "path": rel,
                "bytes_written": content.len(),
            })),
            Err(e) => ToolResult::fail(format!("failed to write {rel}: {e}")),
        }
    }

    fn do_list(&self, params: &Value) -> ToolResult {
        let rel = params.get("path").and_then(Value::as_str).unwrap_or(".");
        let path = match self.resolve(rel) {
            Ok(p) => p,
            Err(e) => return ToolResult::fail(e),
        };
        let entries = match std::fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) => return ToolResult::fail(format!("failed to list {rel}: {e}")),
        };

        let mut files = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            files.push(json!({ "name": name, "dir": is_dir }));
        }
        files.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        ToolResult::ok(json!({ "path": rel, "entries": files }))
    }
}

#[async_trait]
impl Plugin for FileTool {
    fn name(&self) -> &str {
        "file-tool"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Reads and writes files inside the agent workspace"
    }

    fn init(&self, cfg: &Config) -> Result<()> {
        let workspace = PathBuf::from(cfg.get_str("workspace_dir", "."));
        info!(workspace = %workspace.display(), "file tool initialized");
        *self.workspace.write().expect("workspace poisoned") = Some(workspace);
        Ok(())
    }

    fn shutdown(&self) {
        *self.workspace.write().expect("workspace poisoned") = None;
    }

    fn is_initialized(&self) -> bool {
        self.workspace.read().expect("workspace poisoned").is_some()
    }
}

#[async_trait]
impl ToolPlugin for FileTool {
    fn tool_id(&self) -> &str {
        "file"
    }

    fn actions(&self) -> Vec<String> {
        vec!["read_file".into(), "write_file".into(), "list_dir".into()]
    }

    async fn execute(&self, action: &str, params: &Value) -> ToolResult {
        match action {
            "read_file" => self.do_read(params),
            "write_file" => self.do_write(params),
            "list_dir" => self.do_list(params),
            other => ToolResult::fail(format!("Unknown action: {other}")),
        }
    }

    fn agent_tools(&self) -> Vec<AgentTool> {
        vec![
            AgentTool {
                name: "file_read_file".into(),
                description: "Read a text file from the workspace.".into(),
                params: vec![AgentToolParam::required(
                    "path",
                    ParamKind::String,
                    "Workspace-relative file path",
                )],
                tool_id: "file".into(),
                action: "read_file".into(),
            },
            AgentTool {
                name: "file_write_file".into(),
                description: "Write a text file inside the workspace, creating directories as needed.".into(),
                params: vec![
                    AgentToolParam::required("path", ParamKind::String, "Workspace-relative file path"),
                    AgentToolParam::required("content", ParamKind::String, "File content"),
                ],
                tool_id: "file".into(),
                action: "write_file".into(),
            },
            AgentTool {
                name: "file_list_dir".into(),
                description: "List a directory inside the workspace.".into(),
                params: vec![AgentToolParam::optional(
                    "path",
                    ParamKind::String,
                    "Workspace-relative directory (default: workspace root)",
                )],
                tool_id: "file".into(),
                action: "list_dir".into(),
            },
        ]
    }
}
