//! Dual-path conversational response engine for EchoFlow.
//!
//! A voice interface cannot afford dead air while a slow automation runs.
//! This crate answers a turn on two paths at once: a short acknowledgement
//! is produced and delivered immediately, while the requested capabilities
//! execute in a bounded loop.  Long waits are filled with patience
//! messages, and the results are finally fused into one reply in the same
//! tone as the acknowledgement.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!  messages ─────>│  Classifier  │── plain content ──────────> on_immediate
//!                 └──────┬───────┘
//!                        │ invocations
//!          ┌─────────────┴──────────────┐
//!          │                            │
//!   ┌──────┴───────┐   ┌────────────────┴───┐   ┌────────────┐
//!   │  Immediate   │   │ CapabilityExecutor │<->│  Registry  │
//!   │  Responder   │   │  (bounded rounds)  │   │ (validate, │
//!   └──────┬───────┘   └─────────┬──────────┘   │  dispatch) │
//!          │           ┌─────────┴──────────┐   └────────────┘
//!          │           │  PatienceMonitor   │── on_patience
//!          │           └─────────┬──────────┘
//!          v                     v
//!    on_immediate         ┌──────────────┐
//!                         │ FusionEngine │── final reply
//!                         └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`capability`] -- Capability trait, definitions, validation, registry.
//! - [`llm`] -- Completion provider trait, wire types, OpenAI-compatible client.
//! - [`classifier`], [`immediate`], [`executor`], [`patience`], [`fusion`] --
//!   the turn's components.
//! - [`orchestrator`] -- The turn state machine and public entry point.
//! - [`events`] -- Turn events published while a turn runs.
//! - [`config`] -- Engine configuration.
//! - [`error`] -- Engine error types.

pub mod capability;
pub mod classifier;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod fusion;
pub mod immediate;
pub mod llm;
pub mod orchestrator;
pub mod patience;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-export the most commonly used types at the crate root.
pub use capability::{
    Arguments, Capability, CapabilityDefinition, CapabilityError, CapabilityRegistry,
    CapabilityResult, ParamType, ParameterSpec,
};
pub use config::{EngineConfig, ImmediateConfig, PatienceConfig, PatienceThreshold, Replies};
pub use error::{EngineError, Result};
pub use events::{EventSink, TurnEvent};
pub use executor::{InvocationRecord, LoopOutcome, LoopReport};
pub use llm::{
    CapabilityInvocation, Completion, CompletionProvider, CompletionRequest, ConnectionReport,
    LlmClient, LlmClientConfig, Message, ModelParams, Role, ToolChoice,
};
pub use orchestrator::{Orchestrator, TurnOutcome, TurnResponse, TurnState};
