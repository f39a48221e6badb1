//! OpenAI-compatible Chat Completions client.
//!
//! Covers the OpenAI API itself and compatible endpoints such as Volcengine
//! Ark, DeepSeek, Ollama and vLLM.  Non-streaming only: every engine call
//! needs the whole answer before it can act on it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use uuid::Uuid;

use super::CompletionProvider;
use crate::capability::CapabilityDefinition;
use crate::error::{EngineError, Result};
use crate::llm::types::{
    CapabilityInvocation, Completion, CompletionRequest, Message, ModelParams, Role,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default OpenAI API base URL.
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Volcengine Ark (OpenAI-compatible) base URL.
const ARK_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";

/// Default per-request HTTP timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const PING_MAX_TOKENS: u32 = 10;
const PING_PREVIEW_CHARS: usize = 50;

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// Configuration for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// Short provider label used in logs and errors.
    pub provider: String,
    pub api_key: String,
    /// Base URL up to and excluding `/chat/completions`.
    pub base_url: String,
    /// Model (or Ark endpoint id) used when a request leaves it empty.
    pub default_model: String,
    pub timeout: Duration,
}

impl LlmClientConfig {
    /// Configuration for the OpenAI API.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::openai_compatible("openai", api_key, model, OPENAI_BASE_URL)
    }

    /// Configuration for Volcengine Ark, where the model is an endpoint id.
    pub fn volcengine_ark(api_key: impl Into<String>, endpoint_id: impl Into<String>) -> Self {
        Self::openai_compatible("volcengine", api_key, endpoint_id, ARK_BASE_URL)
    }

    /// Configuration for any OpenAI-compatible API.
    pub fn openai_compatible(
        provider: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            default_model: model.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Chat Completions client implementing [`CompletionProvider`].
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: Arc<LlmClientConfig>,
    http: reqwest::Client,
}

impl LlmClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingApiKey`] for an empty key and
    /// [`EngineError::LlmRequestFailed`] if the HTTP client cannot be built.
    pub fn new(config: LlmClientConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(EngineError::MissingApiKey {
                provider: config.provider.clone(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EngineError::LlmRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    pub fn provider(&self) -> &str {
        &self.config.provider
    }

    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    /// Build the JSON body for the Chat Completions API.
    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": if request.model.is_empty() {
                &self.config.default_model
            } else {
                &request.model
            },
            "messages": messages_to_openai(&request.messages),
        });

        if let Some(max_tokens) = request.params.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.params.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(top_p) = request.params.top_p {
            body["top_p"] = json!(top_p);
        }

        if request.has_tools() {
            body["tools"] = tools_to_openai(&request.tools);
            if let Some(choice) = request.tool_choice {
                body["tool_choice"] = json!(choice.as_str());
            }
        }

        body
    }

    /// POST the body to `{base_url}/chat/completions`.
    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", self.config.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value).map_err(|e| EngineError::LlmRequestFailed {
                reason: format!("invalid authorization header: {e}"),
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        tracing::debug!(
            url = %url,
            model = %body["model"],
            provider = %self.config.provider,
            tools = body.get("tools").is_some(),
            "sending completion request"
        );

        let resp = self.http.post(&url).headers(headers).json(body).send().await?;
        Ok(resp)
    }

    /// Send a tiny plain request to check credentials and reachability.
    ///
    /// # Errors
    ///
    /// Returns whatever [`CompletionProvider::complete`] would for the same
    /// endpoint.
    pub async fn ping(&self) -> Result<ConnectionReport> {
        let request = CompletionRequest::plain(
            vec![Message::user("Hello")],
            ModelParams {
                temperature: None,
                max_tokens: Some(PING_MAX_TOKENS),
                top_p: None,
            },
        );

        let started = Instant::now();
        let completion = self.complete(&request).await?;
        let latency = started.elapsed();

        tracing::info!(
            provider = %self.config.provider,
            model = %self.config.default_model,
            latency_ms = latency.as_millis() as u64,
            "llm endpoint reachable"
        );

        Ok(ConnectionReport {
            provider: self.config.provider.clone(),
            model: self.config.default_model.clone(),
            latency,
            preview: completion.content.chars().take(PING_PREVIEW_CHARS).collect(),
        })
    }
}

/// Outcome of [`LlmClient::ping`].
#[derive(Debug, Clone)]
pub struct ConnectionReport {
    pub provider: String,
    pub model: String,
    pub latency: Duration,
    /// Start of the model's answer.
    pub preview: String,
}

#[async_trait]
impl CompletionProvider for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = self.build_request_body(request);
        let resp = self.send(&body).await?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| EngineError::LlmRequestFailed {
                reason: format!("failed to read response body: {e}"),
            })?;

        if !status.is_success() {
            return Err(EngineError::LlmRequestFailed {
                reason: format!("API returned {status}: {text}"),
            });
        }

        let v: Value = serde_json::from_str(&text).map_err(|e| EngineError::LlmParseFailed {
            reason: format!("invalid JSON response: {e}"),
        })?;

        parse_openai_response(&v)
    }
}

// ===========================================================================
// Wire format conversion (free functions)
// ===========================================================================

/// Convert messages to the OpenAI wire format.
///
/// System messages stay in the array, invocations go in
/// `assistant.tool_calls`, and tool results use `role: "tool"` with a
/// `tool_call_id`.
pub fn messages_to_openai(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::System => json!({"role": "system", "content": msg.content}),
            Role::User => json!({"role": "user", "content": msg.content}),
            Role::Assistant if msg.tool_calls.is_empty() => {
                json!({"role": "assistant", "content": msg.content})
            }
            Role::Assistant => {
                let tool_calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments,
                            }
                        })
                    })
                    .collect();

                let mut m = json!({
                    "role": "assistant",
                    "tool_calls": tool_calls,
                });
                if !msg.content.is_empty() {
                    m["content"] = json!(msg.content);
                }
                m
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id,
                "content": msg.content,
            }),
        })
        .collect()
}

/// Wrap each definition as `{"type": "function", "function": {...}}`.
pub fn tools_to_openai(tools: &[CapabilityDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": t.to_function_schema(),
            })
        })
        .collect();
    json!(tool_values)
}

/// Parse a non-streaming Chat Completions response.
///
/// Tool calls without an id get a fresh `call_<uuid>` so every invocation in
/// a turn stays uniquely addressable.  Argument strings are kept raw.
pub fn parse_openai_response(v: &Value) -> Result<Completion> {
    let message = &v["choices"][0]["message"];

    if message.is_null() {
        return Err(EngineError::LlmParseFailed {
            reason: "missing `choices[0].message` in response".into(),
        });
    }

    let content = message["content"].as_str().unwrap_or_default().to_owned();

    let invocations = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .map(|tc| {
                    let func = &tc["function"];
                    let id = tc["id"]
                        .as_str()
                        .filter(|id| !id.is_empty())
                        .map_or_else(|| format!("call_{}", Uuid::now_v7().simple()), str::to_owned);
                    let arguments = match &func["arguments"] {
                        Value::String(s) => s.clone(),
                        Value::Null => String::new(),
                        // Some compatible servers send the object itself.
                        other => other.to_string(),
                    };
                    CapabilityInvocation {
                        id,
                        name: func["name"].as_str().unwrap_or_default().to_owned(),
                        arguments,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Completion {
        content,
        invocations,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
