//! Engine error types.
//!
//! Almost every runtime failure inside a turn is absorbed and turned into
//! user-facing text before it reaches the caller.  [`EngineError`] therefore
//! mostly travels *between* components (a failed completion call, a bad
//! configuration file) and only escapes [`crate::Orchestrator::run_turn`] for
//! structurally invalid input.

/// Unified error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // -- LLM errors ----------------------------------------------------------
    /// An HTTP request to the language-model provider failed.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The provider response could not be parsed into the expected format.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// The API key is missing for a provider that requires one.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    // -- Turn errors ---------------------------------------------------------
    /// `run_turn` was called with no messages at all.
    #[error("conversation is empty; a turn needs at least one message")]
    EmptyConversation,

    // -- Configuration errors ------------------------------------------------
    /// Configuration validation or loading failed.
    #[error("config error: {reason}")]
    Config { reason: String },
}

/// Convenience alias used throughout the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}
