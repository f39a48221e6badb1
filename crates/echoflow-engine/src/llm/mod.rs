//! Language-model integration layer.
//!
//! - [`types`] -- messages, invocations, completion request/response.
//! - [`client`] -- HTTP client for OpenAI-compatible Chat Completions APIs.
//!
//! The engine only talks to the model through [`CompletionProvider`], so
//! tests and alternative transports can stand in for [`LlmClient`].

pub mod client;
pub mod types;

use async_trait::async_trait;

pub use client::{ConnectionReport, LlmClient, LlmClientConfig};
pub use types::{
    CapabilityInvocation, Completion, CompletionRequest, Message, ModelParams, Role, ToolChoice,
};

use crate::error::Result;

/// The `complete(messages, schemas?, tool_choice?)` collaborator.
///
/// One call, one answer: either text, a list of invocations, or both.
/// Timeouts and retries are the implementor's own business.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}
