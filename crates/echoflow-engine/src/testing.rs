//! Test doubles for driving the engine without a network.
//!
//! Compiled for this crate's own tests and, behind the `test-util`
//! feature, for downstream test suites.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{EngineError, Result};
use crate::llm::CompletionProvider;
use crate::llm::types::{CapabilityInvocation, Completion, CompletionRequest};

/// Replays queued completions and records every request.
///
/// Requests with schemas attached and plain requests draw from separate
/// queues, so concurrent immediate calls cannot steal a classifier reply.
/// An exhausted queue answers with a timeout error.
#[derive(Default)]
pub struct ScriptedProvider {
    with_tools: Mutex<VecDeque<Result<Completion>>>,
    plain: Mutex<VecDeque<Result<Completion>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    latency: Duration,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before answering each request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a reply for a schema-attached request.
    pub fn tool_reply(self, reply: Result<Completion>) -> Self {
        lock(&self.with_tools).push_back(reply);
        self
    }

    /// Queue a reply for a plain request.
    pub fn plain_reply(self, reply: Result<Completion>) -> Self {
        lock(&self.plain).push_back(reply);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    pub fn tool_request_count(&self) -> usize {
        self.requests().iter().filter(|r| r.has_tools()).count()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        lock(&self.requests).push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let queue = if request.has_tools() {
            &self.with_tools
        } else {
            &self.plain
        };
        let next = lock(queue).pop_front();
        next.unwrap_or_else(timeout)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A completion requesting one invocation.
pub fn invoke(id: &str, name: &str, args: &str) -> Completion {
    Completion::invocations(vec![CapabilityInvocation::new(id, name, args)])
}

/// The error a provider returns when the request timed out.
pub fn timeout() -> Result<Completion> {
    Err(EngineError::LlmRequestFailed {
        reason: "operation timed out".into(),
    })
}
