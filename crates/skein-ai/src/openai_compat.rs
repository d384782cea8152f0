//! OpenAI-compatible chat-completions provider (llama.cpp server).
//!
//! Providers behind this endpoint shape may return native structured
//! `tool_calls` instead of textual markup; those are reconstructed into
//! `<tool_call>` blocks before the agent loop sees the content, keeping
//! both surfaces identical downstream.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use skein_plugin::{AiPlugin, Plugin};
use skein_types::{
    CompletionOptions, CompletionResult, Config, ConversationMessage, Result, UsageStats,
};

const DEFAULT_API_URL: &str = "http://localhost:8080/v1/chat/completions";
const DEFAULT_MODEL: &str = "local";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Default)]
struct ProviderState {
    api_url: String,
    api_key: String,
    model: String,
    initialized: bool,
}

/// llama.cpp / OpenAI-compatible provider.
///
/// Configured via `llamacpp.api_url` (default local server),
/// optional `llamacpp.api_key` and `llamacpp.model`.
pub struct LlamaCppAi {
    http: reqwest::Client,
    state: RwLock<ProviderState>,
}

impl Default for LlamaCppAi {
    fn default() -> Self {
        Self::new()
    }
}

impl LlamaCppAi {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            state: RwLock::new(ProviderState::default()),
        }
    }
}

// ── Wire types (OpenAI chat completion format) ───────────────────────

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    max_tokens: i64,
    temperature: f64,
}

#[derive(Deserialize, Default)]
struct ApiFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    function: ApiFunction,
}

#[derive(Deserialize, Default)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Deserialize)]
struct ApiChoice {
    #[serde(default)]
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
    #[serde(default)]
    total_tokens: i64,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: ApiUsage,
}

fn build_request(
    model: &str,
    messages: &[ConversationMessage],
    opts: &CompletionOptions,
) -> ApiRequest {
    let mut api_messages = Vec::with_capacity(messages.len() + 1);
    if !opts.system_prompt.is_empty() {
        api_messages.push(ApiMessage {
            role: "system".into(),
            content: opts.system_prompt.clone(),
        });
    }
    for msg in messages {
        api_messages.push(ApiMessage {
            role: msg.role.as_str().into(),
            content: msg.content.clone(),
        });
    }
    ApiRequest {
        model: if opts.model.is_empty() {
            model.to_string()
        } else {
            opts.model.clone()
        },
        messages: api_messages,
        max_tokens: if opts.max_tokens > 0 {
            opts.max_tokens
        } else {
            4096
        },
        temperature: opts.temperature,
    }
}

/// Normalize a response message into plain content.
///
/// Native structured `tool_calls` become `<tool_call>` markup appended
/// after any text (reasoning text is preserved above the block), so an
/// empty-content response with one structured call reconstructs a
/// single synthetic `tool_call` block.
fn normalize_content(message: &ApiResponseMessage) -> String {
    let mut out = message.content.clone().unwrap_or_default();
    if out.is_empty() {
        if let Some(reasoning) = &message.reasoning_content {
            out = reasoning.clone();
        }
    }

    for call in &message.tool_calls {
        if call.function.name.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        let args = if call.function.arguments.trim().is_empty() {
            "{}"
        } else {
            call.function.arguments.trim()
        };
        out.push_str(&format!(
            "<tool_call name=\"{}\">\n{}\n</tool_call>",
            call.function.name, args
        ));
    }
    out
}

fn parse_response(resp: ApiResponse) -> CompletionResult {
    let Some(choice) = resp.choices.first() else {
        return CompletionResult::fail("response contained no choices");
    };

    CompletionResult {
        success: true,
        content: normalize_content(&choice.message),
        error: String::new(),
        stop_reason: choice.finish_reason.clone().unwrap_or_default(),
        model: resp.model,
        usage: UsageStats {
            input_tokens: resp.usage.prompt_tokens,
            output_tokens: resp.usage.completion_tokens,
            total_tokens: resp.usage.total_tokens,
        },
    }
}

#[async_trait]
impl Plugin for LlamaCppAi {
    fn name(&self) -> &str {
        "llamacpp-ai"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "OpenAI-compatible chat provider for llama.cpp servers"
    }

    fn init(&self, cfg: &Config) -> Result<()> {
        let mut state = self.state.write().expect("llamacpp state poisoned");
        state.api_url = cfg.get_str("llamacpp.api_url", DEFAULT_API_URL);
        state.api_key = cfg.get_str("llamacpp.api_key", "");
        state.model = cfg.get_str("llamacpp.model", DEFAULT_MODEL);
        state.initialized = true;
        info!(url = %state.api_url, "llamacpp provider initialized");
        Ok(())
    }

    fn shutdown(&self) {
        self.state
            .write()
            .expect("llamacpp state poisoned")
            .initialized = false;
    }

    fn is_initialized(&self) -> bool {
        self.state
            .read()
            .expect("llamacpp state poisoned")
            .initialized
    }
}

#[async_trait]
impl AiPlugin for LlamaCppAi {
    fn provider_id(&self) -> &str {
        "llamacpp"
    }

    fn available_models(&self) -> Vec<String> {
        vec![self.default_model()]
    }

    fn default_model(&self) -> String {
        self.state
            .read()
            .expect("llamacpp state poisoned")
            .model
            .clone()
    }

    fn is_configured(&self) -> bool {
        !self
            .state
            .read()
            .expect("llamacpp state poisoned")
            .api_url
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
        let (api_url, api_key, model) = {
            let state = self.state.read().expect("llamacpp state poisoned");
            if !state.initialized {
                return CompletionResult::fail("llamacpp provider not initialized");
            }
            (
                state.api_url.clone(),
                state.api_key.clone(),
                state.model.clone(),
            )
        };

        let request = build_request(&model, messages, opts);
        debug!(model = %request.model, messages = request.messages.len(), "llamacpp chat request");

        let mut builder = self.http.post(&api_url).json(&request);
        if !api_key.is_empty() {
            builder = builder.bearer_auth(api_key);
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => return CompletionResult::fail(format!("request failed: {e}")),
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let excerpt: String = body.chars().take(200).collect();
            return CompletionResult::fail(format!("HTTP {status}: {excerpt}"));
        }

        match serde_json::from_str::<ApiResponse>(&body) {
            Ok(parsed) => parse_response(parsed),
            Err(e) => CompletionResult::fail(format!("malformed response: {e}")),
        }
    }
}
