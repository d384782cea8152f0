//! End-to-end message flow: stub channel + stub provider + stub tool
//! wired through the real registry, handler, and agent loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use skein_core::Application;
use skein_plugin::{
    AiPlugin, ChannelPlugin, ErrorCallback, MessageCallback, Plugin, PluginHandle, ToolPlugin,
};
use skein_types::{
    AgentTool, AgentToolParam, ChannelCapabilities, ChannelError, ChannelStatus, ChatType,
    CompletionOptions, CompletionResult, Config, ConversationMessage, Message, MessageRole,
    ParamKind, SendResult, ToolResult,
};

// ── Stub channel ─────────────────────────────────────────────────────

#[derive(Default)]
struct StubChannel {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Plugin for StubChannel {
    fn name(&self) -> &str {
        "test-channel"
    }
    fn init(&self, _cfg: &Config) -> skein_types::Result<()> {
        Ok(())
    }
    fn shutdown(&self) {}
    fn is_initialized(&self) -> bool {
        true
    }
}

#[async_trait]
impl ChannelPlugin for StubChannel {
    fn channel_id(&self) -> &str {
        "test"
    }
    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities::default()
    }
    async fn start(&self) -> Result<(), ChannelError> {
        Ok(())
    }
    async fn stop(&self) {}
    fn status(&self) -> ChannelStatus {
        ChannelStatus::Running
    }
    async fn send_message(&self, to: &str, text: &str, _reply_to: Option<&str>) -> SendResult {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), text.to_string()));
        SendResult::ok("1")
    }
    fn set_message_callback(&self, _cb: MessageCallback) {}
    fn set_error_callback(&self, _cb: ErrorCallback) {}
}

// ── Stub AI provider ─────────────────────────────────────────────────

struct StubAi {
    replies: Mutex<Vec<String>>,
    calls: Mutex<Vec<Vec<ConversationMessage>>>,
}

impl StubAi {
    /// Provider returning the scripted replies in order.
    fn scripted(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Plugin for StubAi {
    fn name(&self) -> &str {
        "stub-ai"
    }
    fn init(&self, _cfg: &Config) -> skein_types::Result<()> {
        Ok(())
    }
    fn shutdown(&self) {}
    fn is_initialized(&self) -> bool {
        true
    }
}

#[async_trait]
impl AiPlugin for StubAi {
    fn provider_id(&self) -> &str {
        "stub"
    }
    fn available_models(&self) -> Vec<String> {
        vec!["stub-1".into()]
    }
    fn default_model(&self) -> String {
        "stub-1".into()
    }
    fn is_configured(&self) -> bool {
        true
    }
    async fn chat(
        &self,
        messages: &[ConversationMessage],
        _opts: &CompletionOptions,
    ) -> CompletionResult {
        self.calls.lock().unwrap().push(messages.to_vec());
        match self.replies.lock().unwrap().pop() {
            Some(content) => CompletionResult::ok(content),
            None => CompletionResult::fail("script exhausted"),
        }
    }
}

// ── Stub browser tool ────────────────────────────────────────────────

#[derive(Default)]
struct StubBrowser {
    fetches: AtomicUsize,
}

#[async_trait]
impl Plugin for StubBrowser {
    fn name(&self) -> &str {
        "stub-browser"
    }
    fn init(&self, _cfg: &Config) -> skein_types::Result<()> {
        Ok(())
    }
    fn shutdown(&self) {}
    fn is_initialized(&self) -> bool {
        true
    }
}

#[async_trait]
impl ToolPlugin for StubBrowser {
    fn tool_id(&self) -> &str {
        "browser"
    }
    fn actions(&self) -> Vec<String> {
        vec!["fetch".into()]
    }
    async fn execute(&self, action: &str, _params: &serde_json::Value) -> ToolResult {
        match action {
            "fetch" => {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                ToolResult::ok(serde_json::json!({"content": "OK"}))
            }
            other => ToolResult::fail(format!("Unknown action: {other}")),
        }
    }
    fn agent_tools(&self) -> Vec<AgentTool> {
        vec![AgentTool {
            name: "browser_fetch".into(),
            description: "Fetch a URL and return its content.".into(),
            params: vec![AgentToolParam::required(
                "url",
                ParamKind::String,
                "The URL to fetch",
            )],
            tool_id: "browser".into(),
            action: "fetch".into(),
        }]
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn direct_message(id: &str, text: &str) -> Message {
    Message {
        id: id.into(),
        channel: "test".into(),
        from: "u1".into(),
        from_name: "User One".into(),
        to: "u1".into(),
        text: text.into(),
        chat_type: ChatType::Direct,
        timestamp: 1_700_000_000,
        reply_to_id: None,
        media_url: None,
    }
}

fn build_app(plugins: Vec<PluginHandle>) -> Application {
    let config = Config::load_str(r#"{"workers": 2}"#).unwrap();
    let app = Application::new(config, plugins, None);
    app.init();
    app
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn free_form_message_reaches_ai_and_replies() {
    let channel = Arc::new(StubChannel::default());
    let ai = Arc::new(StubAi::scripted(&["hi"]));
    let app = build_app(vec![
        PluginHandle::Channel(channel.clone()),
        PluginHandle::Ai(ai.clone()),
    ]);

    app.handler().handle(direct_message("m1", "hello")).await;

    // The provider saw the user text as the final message.
    let calls = ai.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let last = calls[0].last().unwrap();
    assert_eq!(last.role, MessageRole::User);
    assert_eq!(last.content, "hello");
    drop(calls);

    // The reply went back to the sender.
    let sent = channel.sent.lock().unwrap();
    assert_eq!(sent.as_slice(), &[("u1".to_string(), "hi".to_string())]);
    drop(sent);

    // The session holds both turns.
    let key = "agent:default:main";
    let history = app.sessions().history(key);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "hello");
    assert_eq!(history[1].content, "hi");

    app.shutdown().await;
}

#[tokio::test]
async fn tool_call_round_trip() {
    let channel = Arc::new(StubChannel::default());
    let browser = Arc::new(StubBrowser::default());
    let ai = Arc::new(StubAi::scripted(&[
        "<tool_call name=\"browser_fetch\">{\"url\": \"http://x\"}</tool_call>",
        "done",
    ]));
    let app = build_app(vec![
        PluginHandle::Channel(channel.clone()),
        PluginHandle::Tool(browser.clone()),
        PluginHandle::Ai(ai.clone()),
    ]);

    app.handler().handle(direct_message("m1", "fetch it")).await;

    // Tool executed exactly once.
    assert_eq!(browser.fetches.load(Ordering::SeqCst), 1);

    // The second model call saw the tool result injected as a user turn.
    let calls = ai.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    let injected = calls[1].last().unwrap();
    assert_eq!(injected.role, MessageRole::User);
    assert!(injected.content.contains("<tool_result name=\"browser_fetch\" success=\"true\">"));
    assert!(injected.content.contains("OK"));
    drop(calls);

    // Final reply is clean text with no markup.
    let sent = channel.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, "done");
    drop(sent);

    let history = app.sessions().history("agent:default:main");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "fetch it");
    assert_eq!(history[1].content, "done");

    app.shutdown().await;
}

#[tokio::test]
async fn failed_tool_result_is_surfaced_not_fatal() {
    let channel = Arc::new(StubChannel::default());
    let browser = Arc::new(StubBrowser::default());
    let ai = Arc::new(StubAi::scripted(&[
        "<tool_call name=\"browser_missing\">{}</tool_call>",
        "recovered",
    ]));
    let app = build_app(vec![
        PluginHandle::Channel(channel.clone()),
        PluginHandle::Tool(browser),
        PluginHandle::Ai(ai.clone()),
    ]);

    app.handler().handle(direct_message("m1", "go")).await;

    let calls = ai.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls[1]
        .last()
        .unwrap()
        .content
        .contains("success=\"false\""));
    drop(calls);

    assert_eq!(channel.sent.lock().unwrap()[0].1, "recovered");
    app.shutdown().await;
}

#[tokio::test]
async fn model_failure_rolls_back_user_turn() {
    let channel = Arc::new(StubChannel::default());
    let ai = Arc::new(StubAi::scripted(&[])); // immediately exhausted
    let app = build_app(vec![
        PluginHandle::Channel(channel.clone()),
        PluginHandle::Ai(ai),
    ]);

    app.handler().handle(direct_message("m1", "hello")).await;

    let sent = channel.sent.lock().unwrap();
    assert!(sent[0].1.starts_with("AI error:"));
    drop(sent);

    // The failed turn is not persisted; a retry starts clean.
    assert!(app.sessions().history("agent:default:main").is_empty());
    app.shutdown().await;
}

#[tokio::test]
async fn no_provider_yields_fixed_reply() {
    let channel = Arc::new(StubChannel::default());
    let app = build_app(vec![PluginHandle::Channel(channel.clone())]);

    app.handler().handle(direct_message("m1", "hello")).await;

    assert_eq!(channel.sent.lock().unwrap()[0].1, "AI not configured.");
    app.shutdown().await;
}

#[tokio::test]
async fn command_dispatch_bypasses_ai() {
    let channel = Arc::new(StubChannel::default());
    let ai = Arc::new(StubAi::scripted(&["should not be called"]));
    let app = build_app(vec![
        PluginHandle::Channel(channel.clone()),
        PluginHandle::Ai(ai.clone()),
    ]);

    app.handler().handle(direct_message("m1", "/ping")).await;

    assert_eq!(channel.sent.lock().unwrap()[0].1, "pong");
    assert!(ai.calls.lock().unwrap().is_empty());
    app.shutdown().await;
}

#[tokio::test]
async fn duplicate_message_ids_are_debounced() {
    let channel = Arc::new(StubChannel::default());
    let ai = Arc::new(StubAi::scripted(&["one", "two"]));
    let app = build_app(vec![
        PluginHandle::Channel(channel.clone()),
        PluginHandle::Ai(ai.clone()),
    ]);

    app.handler().handle(direct_message("same-id", "hello")).await;
    app.handler().handle(direct_message("same-id", "hello")).await;

    assert_eq!(ai.calls.lock().unwrap().len(), 1);
    assert_eq!(channel.sent.lock().unwrap().len(), 1);
    app.shutdown().await;
}

#[tokio::test]
async fn step_budget_bounds_repeating_tool_calls() {
    let channel = Arc::new(StubChannel::default());
    let browser = Arc::new(StubBrowser::default());
    // The model keeps asking for the same fetch forever.
    let same_call = "<tool_call name=\"browser_fetch\">{\"url\": \"http://x\"}</tool_call>";
    let replies: Vec<&str> = std::iter::repeat(same_call).take(20).collect();
    let ai = Arc::new(StubAi::scripted(&replies));
    let app = build_app(vec![
        PluginHandle::Channel(channel.clone()),
        PluginHandle::Tool(browser.clone()),
        PluginHandle::Ai(ai.clone()),
    ]);

    app.handler().handle(direct_message("m1", "loop")).await;

    // Default budget: 8 model calls, one tool execution per step.
    assert_eq!(ai.calls.lock().unwrap().len(), 8);
    assert_eq!(browser.fetches.load(Ordering::SeqCst), 8);
    app.shutdown().await;
}
