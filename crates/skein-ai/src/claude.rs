//! Anthropic Messages API provider.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use skein_plugin::{AiPlugin, Plugin};
use skein_types::{
    CompletionOptions, CompletionResult, Config, ConversationMessage, MessageRole, Result,
    UsageStats,
};

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Default)]
struct ClaudeState {
    api_key: String,
    model: String,
    api_url: String,
    initialized: bool,
}

/// Anthropic Claude provider.
///
/// Configured via `claude.api_key` (env `CLAUDE_API_KEY`), with
/// optional `claude.model` and `claude.api_url` overrides.
pub struct ClaudeAi {
    http: reqwest::Client,
    state: RwLock<ClaudeState>,
}

impl Default for ClaudeAi {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeAi {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            state: RwLock::new(ClaudeState::default()),
        }
    }
}

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: i64,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Deserialize)]
struct ApiContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: i64,
    #[serde(default)]
    output_tokens: i64,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ApiContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

/// Build the request body: the system prompt is lifted out of the
/// message array (an explicit option wins over a leading system
/// message), and consecutive same-role messages are merged since the
/// API requires user/assistant alternation.
fn build_request(
    model: &str,
    messages: &[ConversationMessage],
    opts: &CompletionOptions,
) -> ApiRequest {
    let mut system = if opts.system_prompt.is_empty() {
        None
    } else {
        Some(opts.system_prompt.clone())
    };

    let mut api_messages: Vec<ApiMessage> = Vec::with_capacity(messages.len());
    for msg in messages {
        let role = match msg.role {
            MessageRole::System => {
                if system.is_none() {
                    system = Some(msg.content.clone());
                }
                continue;
            }
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        match api_messages.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&msg.content);
            }
            _ => api_messages.push(ApiMessage {
                role,
                content: msg.content.clone(),
            }),
        }
    }

    ApiRequest {
        model: if opts.model.is_empty() {
            model.to_string()
        } else {
            opts.model.clone()
        },
        max_tokens: if opts.max_tokens > 0 {
            opts.max_tokens
        } else {
            4096
        },
        messages: api_messages,
        system,
        temperature: (0.0..=1.0).contains(&opts.temperature).then_some(opts.temperature),
    }
}

/// Convert an API response into a [`CompletionResult`].
fn parse_response(resp: ApiResponse) -> CompletionResult {
    let content: String = resp
        .content
        .iter()
        .filter(|b| b.kind == "text")
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("");

    CompletionResult {
        success: true,
        content,
        error: String::new(),
        stop_reason: resp.stop_reason.unwrap_or_default(),
        model: resp.model,
        usage: UsageStats {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
            total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
        },
    }
}

#[async_trait]
impl Plugin for ClaudeAi {
    fn name(&self) -> &str {
        "claude-ai"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Anthropic Claude provider using the Messages API"
    }

    fn init(&self, cfg: &Config) -> Result<()> {
        let mut state = self.state.write().expect("claude state poisoned");
        state.api_key = cfg.get_str("claude.api_key", "");
        state.model = cfg.get_str("claude.model", DEFAULT_MODEL);
        state.api_url = cfg.get_str("claude.api_url", DEFAULT_API_URL);

        if state.api_key.is_empty() {
            warn!("claude: no API key configured (set claude.api_key)");
            state.initialized = false;
            return Err(skein_types::SkeinError::ConfigInvalid {
                reason: "claude.api_key missing".into(),
            });
        }
        debug!(model = %state.model, "claude provider initialized");
        state.initialized = true;
        Ok(())
    }

    fn shutdown(&self) {
        self.state.write().expect("claude state poisoned").initialized = false;
    }

    fn is_initialized(&self) -> bool {
        self.state.read().expect("claude state poisoned").initialized
    }
}

#[async_trait]
impl AiPlugin for ClaudeAi {
    fn provider_id(&self) -> &str {
        "claude"
    }

    fn available_models(&self) -> Vec<String> {
        vec![
            "claude-opus-4-20250514".into(),
            "claude-sonnet-4-20250514".into(),
            "claude-haiku-3-5-20241022".into(),
        ]
    }

    fn default_model(&self) -> String {
        self.state.read().expect("claude state poisoned").model.clone()
    }

    fn is_configured(&self) -> bool {
        !self
            .state
            .read()
            .expect("claude state poisoned")
            .api_key
            .is_empty()
    }

    async fn chat(
        &self,
        messages: &[ConversationMessage],
        opts: &CompletionOptions,
    ) -> CompletionResult {
        if messages.is_empty() {
            return CompletionResult::fail("no messages provided");
        }
        let (api_key, model, api_url) = {
            let state = self.state.read().expect("claude state poisoned");
            if !state.initialized {
                return CompletionResult::fail("claude provider not initialized");
            }
            (
                state.api_key.clone(),
                state.model.clone(),
                state.api_url.clone(),
            )
        };

        let request = build_request(&model, messages, opts);
        debug!(model = %request.model, messages = request.messages.len(), "claude chat request");

        let response = match self
            .http
            .post(&api_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return CompletionResult::fail(format!("request failed: {e}")),
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let detail = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or_else(|_| body.chars().take(200).collect());
            return CompletionResult::fail(format!("HTTP {status}: {detail}"));
        }

        match serde_json::from_str::<ApiResponse>(&body) {
            Ok(parsed) => parse_response(parsed),
            Err(e) => CompletionResult::fail(format!("malformed response: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> CompletionOptions {
        CompletionOptions {
            system_prompt: "be brief".into(),
            ..CompletionOptions::default()
        }
    }

    #[test]
    fn request_lifts_system_prompt() {
        let messages = vec![
            ConversationMessage::user("hi"),
            ConversationMessage::assistant("hello"),
            ConversationMessage::user("more"),
        ];
        let req = build_request(DEFAULT_MODEL, &messages, &opts());
        assert_eq!(req.system.as_deref(), Some("be brief"));
        assert_eq!(req.messages.len(), 3);
        assert_eq!(req.messages[0].role, "user");
        assert_eq!(req.messages[1].role, "assistant");
    }

    #[test]
    fn leading_system_message_used_when_no_option() {
        let messages = vec![
            ConversationMessage::system("from history"),
            ConversationMessage::user("hi"),
        ];
        let mut o = CompletionOptions::default();
        o.system_prompt.clear();
        let req = build_request(DEFAULT_MODEL, &messages, &o);
        assert_eq!(req.system.as_deref(), Some("from history"));
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn consecutive_roles_merged() {
        let messages = vec![
            ConversationMessage::user("part one"),
            ConversationMessage::user("part two"),
            ConversationMessage::assistant("ok"),
        ];
        let req = build_request(DEFAULT_MODEL, &messages, &opts());
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].content, "part one\n\npart two");
    }

    #[test]
    fn request_serializes_expected_shape() {
        let messages = vec![ConversationMessage::user("hi")];
        let req = build_request(DEFAULT_MODEL, &messages, &opts());
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], DEFAULT_MODEL);
        assert_eq!(json["max_tokens"], 4096);
        assert_eq!(json["system"], "be brief");
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn response_parses_content_and_usage() {
        let body = r#"{
            "content": [
                {"type": "text", "text": "Hello"},
                {"type": "text", "text": " there"}
            ],
            "stop_reason": "end_turn",
            "model": "claude-sonnet-4-20250514",
            "usage": {"input_tokens": 12, "output_tokens": 5}
        }"#;
        let result = parse_response(serde_json::from_str(body).unwrap());
        assert!(result.success);
        assert_eq!(result.content, "Hello there");
        assert_eq!(result.stop_reason, "end_turn");
        assert_eq!(result.usage.total_tokens, 17);
    }

    #[test]
    fn out_of_range_temperature_omitted() {
        let messages = vec![ConversationMessage::user("hi")];
        let mut o = opts();
        o.temperature = 3.5;
        let req = build_request(DEFAULT_MODEL, &messages, &o);
        assert!(req.temperature.is_none());
    }

    #[test]
    fn init_without_key_fails_but_leaves_plugin_usable() {
        let plugin = ClaudeAi::new();
        std::env::remove_var("CLAUDE_API_KEY");
        assert!(plugin.init(&Config::empty()).is_err());
        assert!(!plugin.is_initialized());
        assert!(!plugin.is_configured());
    }
}
