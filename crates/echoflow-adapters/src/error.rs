//! Adapter error types.
//!
//! These cover setting a capability up.  Failures while a capability runs
//! are reported as [`echoflow_engine::CapabilityError`] instead, because the
//! registry turns those into failed results.

/// Errors raised while constructing an adapter.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// A configured endpoint is not a usable URL.
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A configuration value is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Convenience alias used throughout the adapters crate.
pub type Result<T> = std::result::Result<T, AdapterError>;
