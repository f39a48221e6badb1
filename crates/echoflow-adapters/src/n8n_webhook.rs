//! Automation webhook capability.
//!
//! Forwards a natural-language `query` to an n8n workflow webhook, which
//! runs the actual automation (sending email, reading a calendar, ...).
//! Rate limiting and transient server errors are retried with exponential
//! backoff; a request timeout is reported as is.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use echoflow_engine::{
    Arguments, Capability, CapabilityDefinition, CapabilityError, ParamType, ParameterSpec,
};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AdapterError, Result};

/// Name the capability registers under.
pub const CAPABILITY_NAME: &str = "n8n_webhook";

pub const ENV_WEBHOOK_URL: &str = "N8N_WEBHOOK_URL";
pub const ENV_TIMEOUT_SECS: &str = "N8N_TIMEOUT_SECS";
pub const ENV_EXECUTION_MODE: &str = "N8N_EXECUTION_MODE";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
const USER_AGENT: &str = concat!("EchoFlow/", env!("CARGO_PKG_VERSION"));

/// Maximum response body kept, in bytes (1 MB).
const MAX_BODY_BYTES: usize = 1_024 * 1_024;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Where and how to reach the webhook.
#[derive(Debug, Clone)]
pub struct N8nWebhookConfig {
    pub webhook_url: Url,
    /// Forwarded as `executionMode`; n8n distinguishes `production` and
    /// `test` webhooks.
    pub execution_mode: String,
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further one.
    pub backoff: Duration,
}

impl N8nWebhookConfig {
    /// Configuration with defaults for everything but the URL.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidUrl`] unless `webhook_url` is an
    /// absolute `http` or `https` URL.
    pub fn new(webhook_url: &str) -> Result<Self> {
        let url = Url::parse(webhook_url).map_err(|e| AdapterError::InvalidUrl {
            url: webhook_url.to_owned(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AdapterError::InvalidUrl {
                url: webhook_url.to_owned(),
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }

        Ok(Self {
            webhook_url: url,
            execution_mode: "production".into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
        })
    }

    /// Read `N8N_WEBHOOK_URL`, `N8N_TIMEOUT_SECS` and `N8N_EXECUTION_MODE`.
    /// Returns `None` when no webhook URL is configured.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(url) = lookup(ENV_WEBHOOK_URL).filter(|u| !u.trim().is_empty()) else {
            return Ok(None);
        };
        let mut config = Self::new(url.trim())?;

        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|e| {
                AdapterError::Config(format!("{ENV_TIMEOUT_SECS}={raw:?} is not a number: {e}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(mode) = lookup(ENV_EXECUTION_MODE).filter(|m| !m.trim().is_empty()) {
            config.execution_mode = mode.trim().to_owned();
        }

        Ok(Some(config))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff = backoff;
        self
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Sends queries to an n8n workflow webhook.
pub struct N8nWebhookCapability {
    definition: CapabilityDefinition,
    config: N8nWebhookConfig,
    client: reqwest::Client,
}

impl N8nWebhookCapability {
    /// # Errors
    ///
    /// Returns [`AdapterError::Client`] if the HTTP client cannot be built.
    pub fn new(config: N8nWebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()?;

        let definition = CapabilityDefinition::new(
            CAPABILITY_NAME,
            "Run an automation workflow through the n8n webhook. Send a clear, \
             self-contained instruction such as sending an email, checking the \
             calendar, processing data or posting a notification.",
        )
        .param(
            ParameterSpec::new(
                "query",
                ParamType::String,
                "The instruction for the automation workflow, describing exactly \
                 what should be done.",
            )
            .required(),
        );

        info!(url = %config.webhook_url, mode = %config.execution_mode, "n8n webhook ready");
        Ok(Self {
            definition,
            config,
            client,
        })
    }

    pub fn config(&self) -> &N8nWebhookConfig {
        &self.config
    }

    /// POST the payload, retrying transient failures.
    async fn post(
        &self,
        payload: &Value,
    ) -> std::result::Result<reqwest::Response, CapabilityError> {
        let mut attempt: u32 = 0;

        loop {
            let sent = self
                .client
                .post(self.config.webhook_url.clone())
                .json(payload)
                .send()
                .await;
            let can_retry = attempt < self.config.max_retries;

            match sent {
                Ok(resp) if can_retry && is_retryable(resp.status()) => {
                    warn!(status = resp.status().as_u16(), attempt, "webhook busy, retrying");
                }
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_timeout() => {
                    return Err(CapabilityError::Timeout {
                        seconds: self.config.timeout.as_secs(),
                    });
                }
                Err(e) if can_retry => {
                    warn!(error = %e, attempt, "webhook request failed, retrying");
                }
                Err(e) => {
                    return Err(CapabilityError::ExecutionFailed {
                        reason: format!("webhook request failed: {e}"),
                    });
                }
            }

            tokio::time::sleep(self.config.backoff.saturating_mul(1 << attempt.min(16))).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl Capability for N8nWebhookCapability {
    fn definition(&self) -> &CapabilityDefinition {
        &self.definition
    }

    async fn execute(&self, args: Arguments) -> std::result::Result<Value, CapabilityError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        let payload = json!({
            "query": query,
            "webhookUrl": self.config.webhook_url.as_str(),
            "executionMode": self.config.execution_mode,
        });
        debug!(query = %truncate(&query, 100), "sending webhook request");

        let started = Instant::now();
        let resp = self.post(&payload).await?;
        let status = resp.status();
        let body = read_body(resp).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if status != StatusCode::OK {
            warn!(status = status.as_u16(), elapsed_ms, "webhook returned an error");
            return Err(CapabilityError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        info!(elapsed_ms, body_length = body.len(), "webhook succeeded");
        let response = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));

        Ok(json!({
            "status": "success",
            "response": response,
            "query": query,
        }))
    }
}

impl std::fmt::Debug for N8nWebhookCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("N8nWebhookCapability")
            .field("url", &self.config.webhook_url.as_str())
            .field("mode", &self.config.execution_mode)
            .finish_non_exhaustive()
    }
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

async fn read_body(resp: reqwest::Response) -> std::result::Result<String, CapabilityError> {
    let bytes = resp.bytes().await.map_err(|e| CapabilityError::ExecutionFailed {
        reason: format!("failed to read webhook response: {e}"),
    })?;

    Ok(if bytes.len() > MAX_BODY_BYTES {
        let truncated = String::from_utf8_lossy(&bytes[..MAX_BODY_BYTES]);
        format!("{truncated}\n... [body truncated at 1 MB]")
    } else {
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

fn truncate(s: &str, max_chars: usize) -> &str {
    s.char_indices().nth(max_chars).map_or(s, |(i, _)| &s[..i])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn rejects_non_http_urls() {
        assert!(matches!(
            N8nWebhookConfig::new("not a url"),
            Err(AdapterError::InvalidUrl { .. })
        ));
        assert!(matches!(
            N8nWebhookConfig::new("ftp://example.com/hook"),
            Err(AdapterError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn defaults() {
        let config = N8nWebhookConfig::new("https://n8n.example.com/webhook/voice").unwrap();
        assert_eq!(config.execution_mode, "production");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn from_lookup_reads_all_settings() {
        let vars = HashMap::from([
            (ENV_WEBHOOK_URL, "http://localhost:5678/webhook/test"),
            (ENV_TIMEOUT_SECS, "12"),
            (ENV_EXECUTION_MODE, "test"),
        ]);
        let config = N8nWebhookConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_owned()))
            .unwrap()
            .unwrap();

        assert_eq!(config.webhook_url.as_str(), "http://localhost:5678/webhook/test");
        assert_eq!(config.timeout, Duration::from_secs(12));
        assert_eq!(config.execution_mode, "test");
    }

    #[test]
    fn from_lookup_without_url_is_none() {
        assert!(N8nWebhookConfig::from_lookup(|_| None).unwrap().is_none());

        let bad_timeout = N8nWebhookConfig::from_lookup(|k| match k {
            ENV_WEBHOOK_URL => Some("http://localhost/hook".into()),
            ENV_TIMEOUT_SECS => Some("soon".into()),
            _ => None,
        });
        assert!(matches!(bad_timeout, Err(AdapterError::Config(_))));
    }

    #[test]
    fn definition_requires_query() {
        let capability =
            N8nWebhookCapability::new(N8nWebhookConfig::new("http://localhost/hook").unwrap())
                .unwrap();
        let schema = capability.definition().to_function_schema();

        assert_eq!(schema["name"], CAPABILITY_NAME);
        assert_eq!(schema["parameters"]["required"], json!(["query"]));
        assert_eq!(schema["parameters"]["properties"]["query"]["type"], "string");
    }

    #[test]
    fn retryable_statuses() {
        for code in [429, 500, 502, 503, 504] {
            assert!(is_retryable(StatusCode::from_u16(code).unwrap()));
        }
        for code in [200, 400, 401, 404, 501] {
            assert!(!is_retryable(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
