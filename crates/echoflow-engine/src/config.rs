//! Engine configuration.
//!
//! Every field is optional in the TOML file; anything left out keeps its
//! default.  A minimal file looks like:
//!
//! ```toml
//! system_prompt = "You are Amy, a cheerful voice assistant."
//! max_rounds = 5
//!
//! [immediate]
//! fallback_phrases = ["One sec, checking.", "Hang on, looking it up."]
//!
//! [[patience.thresholds]]
//! after_secs = 10
//! message = "This one is taking a moment, still on it."
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::llm::types::ModelParams;

// ---------------------------------------------------------------------------
// Environment variable names
// ---------------------------------------------------------------------------

pub const ENV_MAX_ROUNDS: &str = "ECHOFLOW_MAX_ROUNDS";
pub const ENV_SYSTEM_PROMPT: &str = "ECHOFLOW_SYSTEM_PROMPT";
pub const ENV_FUNCTION_CALLING: &str = "ECHOFLOW_FUNCTION_CALLING";

/// Smallest usable round bound: the classifier round plus one follow-up.
const MIN_ROUNDS: u32 = 2;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly, upbeat voice assistant. \
Keep replies short and conversational because they are spoken aloud. \
Use the available tools whenever the user asks for information or an action \
you cannot answer from the conversation alone.";

// ---------------------------------------------------------------------------
// Top-level configuration
// ---------------------------------------------------------------------------

/// Configuration for one [`crate::Orchestrator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prepended to the conversation when it does not start with a system
    /// message, and used by the immediate and fusion calls.
    pub system_prompt: String,

    /// Upper bound on schema-attached completion calls per turn, the
    /// classifier call included.  At least 2, so the model can answer after
    /// seeing one round of results.
    pub max_rounds: u32,

    /// When false every turn is answered directly, without schemas.
    pub function_calling: bool,

    pub classifier: ModelParams,
    pub executor: ModelParams,
    pub immediate: ImmediateConfig,
    pub fusion: ModelParams,
    pub patience: PatienceConfig,
    pub replies: Replies,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            max_rounds: 5,
            function_calling: true,
            classifier: ModelParams::default(),
            executor: ModelParams::default(),
            immediate: ImmediateConfig::default(),
            fusion: ModelParams::default(),
            patience: PatienceConfig::default(),
            replies: Replies::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document and validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] on a syntax error or a failed
    /// [`validate`](Self::validate).
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| EngineError::Config {
            reason: format!("failed to parse TOML config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the file cannot be read or is
    /// invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
            reason: format!("failed to read config file {}: {e}", path.display()),
        })?;

        let config = Self::from_toml_str(&raw)?;
        info!(path = %path.display(), max_rounds = config.max_rounds, "configuration loaded");
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.max_rounds < MIN_ROUNDS {
            return Err(config_error(&format!(
                "max_rounds must be at least {MIN_ROUNDS}; the classifier call is round 1"
            )));
        }
        if self.patience.poll_interval_ms == 0 {
            return Err(config_error("patience.poll_interval_ms must be positive"));
        }
        if self.immediate.fallback_phrases.is_empty() {
            return Err(config_error("immediate.fallback_phrases must not be empty"));
        }

        let ascending = self
            .patience
            .thresholds
            .windows(2)
            .all(|pair| pair[0].after_secs < pair[1].after_secs);
        if !ascending {
            return Err(config_error(
                "patience.thresholds must be strictly ascending by after_secs",
            ));
        }

        Ok(())
    }

    /// Apply `ECHOFLOW_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if a variable is set but malformed.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in
    /// production, a map in tests).
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_ROUNDS) {
            self.max_rounds = raw.trim().parse().map_err(|e| EngineError::Config {
                reason: format!("{ENV_MAX_ROUNDS}={raw:?} is not a round count: {e}"),
            })?;
            debug!(max_rounds = self.max_rounds, "max_rounds overridden from environment");
        }

        if let Some(prompt) = lookup(ENV_SYSTEM_PROMPT)
            && !prompt.trim().is_empty()
        {
            self.system_prompt = prompt;
            debug!("system prompt overridden from environment");
        }

        if let Some(raw) = lookup(ENV_FUNCTION_CALLING) {
            self.function_calling = parse_flag(&raw).ok_or_else(|| EngineError::Config {
                reason: format!("{ENV_FUNCTION_CALLING}={raw:?} is not a boolean"),
            })?;
            debug!(
                function_calling = self.function_calling,
                "function calling overridden from environment"
            );
        }

        self.validate()
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// The `[immediate]` section: low-latency sampling plus the fallback set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImmediateConfig {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    /// Used in rotation when the immediate call fails or returns nothing.
    pub fallback_phrases: Vec<String>,
}

impl ImmediateConfig {
    pub fn params(&self) -> ModelParams {
        ModelParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }
}

impl Default for ImmediateConfig {
    fn default() -> Self {
        Self {
            temperature: Some(0.3),
            max_tokens: Some(50),
            top_p: Some(0.8),
            fallback_phrases: vec![
                "Hmm, let me check that for you.".into(),
                "Okay okay, one moment.".into(),
                "Give me a second, almost there.".into(),
            ],
        }
    }
}

/// The `[patience]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatienceConfig {
    pub poll_interval_ms: u64,
    /// Strictly ascending by `after_secs`.
    pub thresholds: Vec<PatienceThreshold>,
}

impl PatienceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for PatienceConfig {
    fn default() -> Self {
        let ladder = [
            (10, "This one is a bit involved, give me just a little longer..."),
            (15, "Wow, it's slow today, let me nudge it along..."),
            (20, "Honestly, this system is taking its time. Almost there!"),
            (25, "Hang in there, I'm still working on it!"),
            (30, "Okay, this is taking longer than I expected."),
        ];
        Self {
            poll_interval_ms: 1000,
            thresholds: ladder
                .into_iter()
                .map(|(after_secs, message)| PatienceThreshold {
                    after_secs,
                    message: message.to_owned(),
                })
                .collect(),
        }
    }
}

/// One rung of the patience ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatienceThreshold {
    pub after_secs: u64,
    pub message: String,
}

impl PatienceThreshold {
    pub fn new(after_secs: u64, message: impl Into<String>) -> Self {
        Self {
            after_secs,
            message: message.into(),
        }
    }

    pub fn after(&self) -> Duration {
        Duration::from_secs(self.after_secs)
    }
}

/// The `[replies]` section: fixed user-facing strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Replies {
    /// Delivered when the classifier call fails.
    pub classifier_apology: String,
    /// Delivered when the capability loop is exceeded or fails.
    pub loop_apology: String,
    /// Fusion fallback when no capability succeeded.
    pub fusion_apology: String,
    /// Fusion fallback lead-in before the verbatim results.
    pub fusion_prefix: String,
}

impl Default for Replies {
    fn default() -> Self {
        Self {
            classifier_apology: "Sorry, I'm having a little trouble right now. \
                                 Could you try again in a moment?"
                .into(),
            loop_apology: "Sorry, I couldn't finish that request. \
                           Could you try rephrasing it?"
                .into(),
            fusion_apology: "Sorry, the system had a hiccup and I couldn't get that \
                             information this time."
                .into(),
            fusion_prefix: "Got it! Here's what I found:".into(),
        }
    }
}

fn config_error(reason: &str) -> EngineError {
    EngineError::Config {
        reason: reason.to_owned(),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
