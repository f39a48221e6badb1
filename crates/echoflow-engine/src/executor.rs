//! The capability loop.
//!
//! Rounds are strictly sequential; invocations inside one round run
//! concurrently and each yields exactly one [`CapabilityResult`].  The loop
//! ends in one of three tagged states and never recurses:
//!
//! ```text
//!   round r: execute pending invocations -> append tool messages
//!            r == max_rounds?  -> Exceeded
//!            complete(schemas) -> error        -> Failed
//!                              -> invocations  -> round r + 1
//!                              -> plain text   -> Settled
//! ```
//!
//! The classifier call that produced the first invocations counts against
//! `max_rounds`, so a turn never makes more than `max_rounds`
//! schema-attached completion calls in total.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityDefinition, CapabilityRegistry, CapabilityResult};
use crate::llm::CompletionProvider;
use crate::llm::types::{
    CapabilityInvocation, Completion, CompletionRequest, Message, ModelParams,
};

/// Terminal mark of the capability loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The model answered with plain text after seeing the results.
    Settled(String),
    /// The model still wanted capabilities when the round bound was hit.
    Exceeded,
    /// A completion call inside the loop failed.
    Failed(String),
}

impl LoopOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }
}

/// An invocation paired with the result it produced.
#[derive(Debug, Clone)]
pub struct InvocationRecord {
    pub invocation: CapabilityInvocation,
    pub result: CapabilityResult,
}

/// Everything the orchestrator needs once the loop is done.
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub outcome: LoopOutcome,
    /// Rounds of capability execution performed.
    pub rounds: u32,
    /// Results of the last executed round, in request order.  Earlier
    /// rounds are only visible through the conversation.
    pub records: Vec<InvocationRecord>,
    /// Invocations executed across all rounds.
    pub invocations: usize,
    /// Wall time from the first execution to the terminal mark.
    pub elapsed: Duration,
}

pub struct CapabilityExecutor {
    provider: Arc<dyn CompletionProvider>,
    registry: Arc<CapabilityRegistry>,
    params: ModelParams,
    max_rounds: u32,
}

impl CapabilityExecutor {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        registry: Arc<CapabilityRegistry>,
        params: ModelParams,
        max_rounds: u32,
    ) -> Self {
        Self {
            provider,
            registry,
            params,
            max_rounds: max_rounds.max(1),
        }
    }

    /// Run the loop starting from the classifier's `first` completion.
    ///
    /// `conversation` receives one assistant message per round followed by
    /// one tool message per invocation of that round.
    pub async fn run(
        &self,
        conversation: &mut Vec<Message>,
        first: Completion,
        schemas: &[CapabilityDefinition],
    ) -> LoopReport {
        let started = Instant::now();
        let mut pending = first;
        let mut records = Vec::new();
        let mut executed = 0;
        let mut round = 0;

        let outcome = loop {
            round += 1;
            info!(round, invocations = pending.invocations.len(), "capability round");

            let results = self.execute_round(&pending.invocations).await;
            executed += results.len();
            records.clear();
            conversation.push(Message::assistant_invocations(
                pending.content,
                pending.invocations.clone(),
            ));
            for (invocation, result) in pending.invocations.into_iter().zip(results) {
                conversation.push(Message::tool_result(
                    invocation.id.clone(),
                    result.to_tool_content(),
                ));
                records.push(InvocationRecord { invocation, result });
            }

            if round >= self.max_rounds {
                warn!(round, "capability round bound reached");
                break LoopOutcome::Exceeded;
            }

            let request =
                CompletionRequest::with_tools(conversation.clone(), schemas.to_vec(), self.params);
            match self.provider.complete(&request).await {
                Ok(next) if next.wants_capabilities() => {
                    debug!(round, "model requested further capabilities");
                    pending = next;
                }
                Ok(settled) => break LoopOutcome::Settled(settled.content),
                Err(e) => {
                    warn!(round, error = %e, "completion failed inside capability loop");
                    break LoopOutcome::Failed(e.to_string());
                }
            }
        };

        let elapsed = started.elapsed();
        info!(
            rounds = round,
            invocations = executed,
            elapsed_ms = elapsed.as_millis() as u64,
            settled = outcome.is_settled(),
            "capability loop finished"
        );

        LoopReport {
            outcome,
            rounds: round,
            records,
            invocations: executed,
            elapsed,
        }
    }

    async fn execute_round(&self, invocations: &[CapabilityInvocation]) -> Vec<CapabilityResult> {
        join_all(
            invocations
                .iter()
                .map(|invocation| self.registry.execute_invocation(invocation)),
        )
        .await
    }
}
