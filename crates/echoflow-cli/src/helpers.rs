//! Shared setup for the CLI subcommands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use echoflow_adapters::{N8nWebhookCapability, N8nWebhookConfig};
use echoflow_engine::{CapabilityRegistry, EngineConfig, LlmClientConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Configuration file picked up when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "echoflow.toml";

const DEFAULT_MODEL_OPENAI: &str = "gpt-4o-mini";

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Install the global subscriber.  `RUST_LOG` overrides `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Engine configuration
// ---------------------------------------------------------------------------

/// Load the engine configuration, apply `ECHOFLOW_*` overrides and append
/// the current date to the system prompt.
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    let path: Option<PathBuf> = match path {
        Some(p) => Some(p.to_owned()),
        None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
    };

    let mut config = match path {
        Some(ref p) => EngineConfig::load(p)
            .with_context(|| format!("failed to load config from {}", p.display()))?,
        None => {
            info!("no config file, using defaults");
            EngineConfig::default()
        }
    };

    config
        .apply_env_overrides()
        .context("invalid ECHOFLOW_* environment override")?;

    let now = chrono::Local::now();
    config.system_prompt.push_str(&format!(
        "\n\nCurrent date and time: {}",
        now.format("%Y-%m-%d %H:%M %Z (%A)")
    ));

    Ok(config)
}

// ---------------------------------------------------------------------------
// Language-model provider
// ---------------------------------------------------------------------------

/// Resolve the completion endpoint from the environment.
///
/// Resolution order:
///
/// 1. `ECHOFLOW_API_KEY` -- any OpenAI-compatible endpoint; the base URL
///    defaults to Volcengine Ark and the model comes from `ECHOFLOW_MODEL`
///    or `VOLCENGINE_ENDPOINT_ID`.
/// 2. `VOLCENGINE_API_KEY` -- Volcengine Ark with `VOLCENGINE_ENDPOINT_ID`.
/// 3. `OPENAI_API_KEY` -- OpenAI.
///
/// `ECHOFLOW_MODEL` and `ECHOFLOW_API_BASE_URL` override in every case.
pub fn resolve_llm_config() -> Result<LlmClientConfig> {
    resolve_llm_config_from(env_non_empty)
}

fn resolve_llm_config_from<F>(lookup: F) -> Result<LlmClientConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let model = lookup("ECHOFLOW_MODEL").or_else(|| lookup("VOLCENGINE_ENDPOINT_ID"));
    let base_url = lookup("ECHOFLOW_API_BASE_URL");

    let mut config = if let Some(key) = lookup("ECHOFLOW_API_KEY") {
        let Some(model) = model else {
            bail!("ECHOFLOW_API_KEY needs ECHOFLOW_MODEL or VOLCENGINE_ENDPOINT_ID");
        };
        let mut cfg = LlmClientConfig::volcengine_ark(key, model);
        cfg.provider = "openai-compatible".into();
        cfg
    } else if let Some(key) = lookup("VOLCENGINE_API_KEY") {
        let Some(model) = model else {
            bail!("VOLCENGINE_API_KEY is set but VOLCENGINE_ENDPOINT_ID is not");
        };
        LlmClientConfig::volcengine_ark(key, model)
    } else if let Some(key) = lookup("OPENAI_API_KEY") {
        let model = lookup("ECHOFLOW_MODEL").unwrap_or_else(|| DEFAULT_MODEL_OPENAI.to_owned());
        LlmClientConfig::openai(key, model)
    } else {
        bail!(
            "no language-model credentials found; set ECHOFLOW_API_KEY, \
             VOLCENGINE_API_KEY or OPENAI_API_KEY (a .env file works too)"
        );
    };

    if let Some(url) = base_url {
        config.base_url = url.trim_end_matches('/').to_owned();
    }

    info!(provider = %config.provider, model = %config.default_model, "language model resolved");
    Ok(config)
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Build the registry for this process: the n8n webhook when
/// `N8N_WEBHOOK_URL` is set, nothing otherwise.
pub fn build_registry() -> Result<Arc<CapabilityRegistry>> {
    let registry = Arc::new(CapabilityRegistry::new());

    match N8nWebhookConfig::from_env().context("invalid n8n webhook configuration")? {
        Some(config) => {
            let webhook =
                N8nWebhookCapability::new(config).context("failed to set up n8n webhook")?;
            registry.register(Arc::new(webhook));
        }
        None => warn!("N8N_WEBHOOK_URL not set, running without capabilities"),
    }

    Ok(registry)
}

/// Read an environment variable, treating empty values as unset.
pub fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
