//! Memory tool: exposes the memory manager to users and the model.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use skein_memory::MemoryManager;
use skein_plugin::{Plugin, ToolPlugin};
use skein_types::{AgentTool, AgentToolParam, Config, ParamKind, Result, ToolResult};

/// Memory and task actions backed by a shared [`MemoryManager`].
///
/// Store calls are synchronous SQLite work, so each action hops to the
/// blocking pool.
pub struct MemoryTool {
    manager: Arc<MemoryManager>,
}

impl MemoryTool {
    pub fn new(manager: Arc<MemoryManager>) -> Self {
        Self { manager }
    }

    async fn run_blocking<F, T>(&self, f: F) -> std::result::Result<T, String>
    where
        F: FnOnce(Arc<MemoryManager>) -> std::result::Result<T, String> + Send + 'static,
        T: Send + 'static,
    {
        let manager = self.manager.clone();
        tokio::task::spawn_blocking(move || f(manager))
            .await
            .map_err(|e| format!("memory task failed: {e}"))?
    }

    async fn do_save(&self, params: &Value) -> ToolResult {
        let Some(content) = params.get("content").and_then(Value::as_str) else {
            return ToolResult::fail("missing 'content' parameter");
        };
        let content = content.to_string();
        let filename = params
            .get("filename")
            .and_then(Value::as_str)
            .map(String::from);
        let append = params.get("append").and_then(Value::as_bool).unwrap_or(false);

        let outcome = self
            .run_blocking(move |manager| {
                let name = filename.as_deref().unwrap_or("MEMORY.md");
                let result = if append {
                    manager.append_to_memory(&content, name)
                } else {
                    manager.save_memory(&content, Some(name))
                };
                result.map(|_| name.to_string()).map_err(|e| e.to_string())
            })
            .await;

        match outcome {
            Ok(name) => ToolResult::ok(json!(format!("Saved to {name}"))),
            Err(e) => ToolResult::fail(e),
        }
    }

    async fn do_search(&self, params: &Value) -> ToolResult {
        let Some(query) = params.get("query").and_then(Value::as_str) else {
            return ToolResult::fail("missing 'query' parameter");
        };
        let query = query.to_string();
        let chat_type = params
            .get("chat_type")
            .and_then(Value::as_str)
            .map(String::from);

        let outcome = self
            .run_blocking(move |manager| {
                Ok(manager.search(&query, chat_type.as_deref()))
            })
            .await;

        match outcome {
            Ok(results) => {
                let rendered: Vec<Value> = results
                    .iter()
                    .map(|r| {
                        json!({
                            "path": r.path,
                            "score": r.score,
                            "snippet": r.snippet,
                            "citation": r.citation,
                        })
                    })
                    .collect();
                ToolResult::ok(json!({ "count": rendered.len(), "results": rendered }))
            }
            Err(e) => ToolResult::fail(e),
        }
    }

    async fn do_get(&self, params: &Value) -> ToolResult {
        let Some(path) = params.get("path").and_then(Value::as_str) else {
            return ToolResult::fail("missing 'path' parameter");
        };
        let path = path.to_string();
        let outcome = self
            .run_blocking(move |manager| {
                manager.get_memory_content(&path).map_err(|e| e.to_string())
            })
            .await;
        match outcome {
            Ok(content) => ToolResult::ok(Value::String(content)),
            Err(e) => ToolResult::fail(e),
        }
    }

    async fn do_list(&self) -> ToolResult {
        let outcome = self
            .run_blocking(move |manager| Ok(manager.list_memory_files()))
            .await;
        match outcome {
            Ok(files) => ToolResult::ok(json!({ "files": files })),
            Err(e) => ToolResult::fail(e),
        }
    }

    async fn do_task_create(&self, params: &Value) -> ToolResult {
        let Some(content) = params.get("content").and_then(Value::as_str) else {
            return ToolResult::fail("missing 'content' parameter");
        };
        let content = content.to_string();
        let context = params
            .get("context")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let channel = params
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let user_id = params
            .get("user_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let due_at = params.get("due_at").and_then(Value::as_i64).unwrap_or(0);

        let outcome = self
            .run_blocking(move |manager| {
                manager
                    .create_task(&content, &context, &channel, &user_id, due_at)
                    .map_err(|e| e.to_string())
            })
            .await;
        match outcome {
            Ok(id) => ToolResult::ok(json!({ "id": id })),
            Err(e) => ToolResult::fail(e),
        }
    }

    async fn do_task_complete(&self, params: &Value) -> ToolResult {
        let Some(id) = params.get("id").and_then(Value::as_str) else {
            return ToolResult::fail("missing 'id' parameter");
        };
        let id = id.to_string();
        let outcome = self
            .run_blocking(move |manager| manager.complete_task(&id).map_err(|e| e.to_string()))
            .await;
        match outcome {
            Ok(true) => ToolResult::ok(json!("Task completed")),
            Ok(false) => ToolResult::fail("task not found"),
            Err(e) => ToolResult::fail(e),
        }
    }

    async fn do_task_list(&self, params: &Value) -> ToolResult {
        let include_completed = params
            .get("include_completed")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let outcome = self
            .run_blocking(move |manager| {
                manager
                    .list_tasks(include_completed)
                    .map_err(|e| e.to_string())
            })
            .await;
        match outcome {
            Ok(tasks) => ToolResult::ok(json!({
                "count": tasks.len(),
                "tasks": tasks,
            })),
            Err(e) => ToolResult::fail(e),
        }
    }
}

#[async_trait]
impl Plugin for MemoryTool {
    fn name(&self) -> &str {
        "memory-tool"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Persistent memory and task storage with full-text search"
    }

    fn init(&self, _cfg: &Config) -> Result<()> {
        // The manager arrives pre-configured; sync happens at startup.
        Ok(())
    }

    fn shutdown(&self) {}

    fn is_initialized(&self) -> bool {
        true
    }
}

#[async_trait]
impl ToolPlugin for MemoryTool {
    fn tool_id(&self) -> &str {
        "memory"
    }

    fn actions(&self) -> Vec<String> {
        vec![
            "memory_save".into(),
            "memory_search".into(),
            "memory_get".into(),
            "memory_list".into(),
            "task_create".into(),
            "task_complete".into(),
            "task_list".into(),
        ]
    }

    async fn execute(&self, action: &str, params: &Value) -> ToolResult {
        debug!(action, "memory tool action");
        match action {
            "memory_save" => self.do_save(params).await,
            "memory_search" => self.do_search(params).await,
            "memory_get" => self.do_get(params).await,
            "memory_list" => self.do_list().await,
            "task_create" => self.do_task_create(params).await,
            "task_complete" => self.do_task_complete(params).await,
            "task_list" => self.do_task_list(params).await,
            other => ToolResult::fail(format!("Unknown action: {other}")),
        }
    }

    fn agent_tools(&self) -> Vec<AgentTool> {
        let tool = |name: &str, action: &str, description: &str, params: Vec<AgentToolParam>| {
            AgentTool {
                name: name.into(),
                description: description.into(),
                params,
                tool_id: "memory".into(),
                action: action.into(),
            }
        };
        vec![
            tool(
                "memory_save",
                "memory_save",
                "Save important content to long-term memory. Use for facts, preferences, or context that should persist across sessions.",
                vec![
                    AgentToolParam::required("content", ParamKind::String, "The content to remember"),
                    AgentToolParam::optional("filename", ParamKind::String, "Target file (default MEMORY.md)"),
                    AgentToolParam::optional("append", ParamKind::Boolean, "Append instead of overwrite"),
                ],
            ),
            tool(
                "memory_search",
                "memory_search",
                "Search through memories for relevant information. Returns snippets ranked by relevance.",
                vec![AgentToolParam::required("query", ParamKind::String, "What to look for")],
            ),
            tool(
                "memory_get",
                "memory_get",
                "Get the full content of a specific memory file.",
                vec![AgentToolParam::required("path", ParamKind::String, "Workspace-relative file path")],
            ),
            tool(
                "memory_list",
                "memory_list",
                "List all memory files in the workspace.",
                vec![],
            ),
            tool(
                "task_create",
                "task_create",
                "Create a task or reminder for later. Tasks persist across sessions.",
                vec![
                    AgentToolParam::required("content", ParamKind::String, "What needs to be done"),
                    AgentToolParam::optional("context", ParamKind::String, "Extra context or notes"),
                    AgentToolParam::optional("due_at", ParamKind::Integer, "Due time, unix milliseconds (0 = none)"),
                ],
            ),
            tool(
                "task_complete",
                "task_complete",
                "Mark a task as completed by its ID.",
                vec![AgentToolParam::required("id", ParamKind::String, "The task ID")],
            ),
            tool(
                "task_list",
                "task_list",
                "List all tasks. Shows pending tasks by default.",
                vec![AgentToolParam::optional(
                    "include_completed",
                    ParamKind::Boolean,
                    "Include completed tasks",
                )],
            ),
        ]
    }
}
