//! Capabilities: named, schema-described external actions the language model
//! may invoke.
//!
//! - [`definition`] -- parameter specs and function-calling schema export.
//! - [`validate`] -- argument checking against a definition.
//! - [`result`] -- the immutable per-invocation outcome.
//! - [`registry`] -- the registry that resolves, validates and dispatches.

pub mod definition;
pub mod registry;
pub mod result;
pub mod validate;

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use definition::{CapabilityDefinition, ParamType, ParameterSpec};
pub use registry::CapabilityRegistry;
pub use result::CapabilityResult;
pub use validate::validate_arguments;

/// Parsed invocation arguments.
pub type Arguments = Map<String, Value>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a capability invocation failed.
///
/// These never escape the registry: [`CapabilityRegistry::execute`] folds
/// them into a failed [`CapabilityResult`].
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    /// No capability with this name is registered.
    #[error("unknown capability: `{name}`")]
    Unknown { name: String },

    /// The raw argument string was not a JSON object.
    #[error("invalid arguments for `{capability}`: {reason}")]
    InvalidArguments { capability: String, reason: String },

    /// The arguments violate the declared parameter specs.
    #[error("validation failed for `{capability}`: {reason}")]
    Validation { capability: String, reason: String },

    /// The capability body reported a failure.
    #[error("execution failed: {reason}")]
    ExecutionFailed { reason: String },

    /// A remote automation answered with a non-success status.
    #[error("upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    /// The remote automation did not answer in time.
    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The capability body panicked.
    #[error("capability panicked: {reason}")]
    Panicked { reason: String },
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// A unit of external functionality the engine can dispatch by name.
///
/// Implementors describe themselves through [`Capability::definition`] and do
/// their work in [`Capability::execute`].  Arguments arrive already validated
/// against the definition, with defaults filled in.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Name, description and parameters of this capability.
    fn definition(&self) -> &CapabilityDefinition;

    /// Run the capability.  The returned value becomes
    /// [`CapabilityResult::data`].
    async fn execute(&self, args: Arguments) -> Result<Value, CapabilityError>;
}
