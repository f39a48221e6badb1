//! First-call classification: does this turn need a capability?

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::capability::CapabilityDefinition;
use crate::llm::CompletionProvider;
use crate::llm::types::{Completion, CompletionRequest, Message, ModelParams};

/// How a turn proceeds after the first completion call.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Plain content; the turn is answered directly.
    Direct(String),
    /// The model asked for one or more capability invocations.
    DualPath(Completion),
    /// The call failed; the turn degrades to a direct apology.
    Failed(String),
}

/// Issues the single schema-attached first call of a turn.
pub struct Classifier {
    provider: Arc<dyn CompletionProvider>,
    params: ModelParams,
    apology: String,
}

impl Classifier {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        params: ModelParams,
        apology: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            params,
            apology: apology.into(),
        }
    }

    /// Classify the turn.  With no schemas the request goes out plain and
    /// the answer is always [`Classification::Direct`].
    pub async fn classify(
        &self,
        messages: &[Message],
        schemas: &[CapabilityDefinition],
    ) -> Classification {
        let request = if schemas.is_empty() {
            CompletionRequest::plain(messages.to_vec(), self.params)
        } else {
            CompletionRequest::with_tools(messages.to_vec(), schemas.to_vec(), self.params)
        };
        debug!(schemas = schemas.len(), messages = messages.len(), "classifying turn");

        match self.provider.complete(&request).await {
            Ok(completion) if completion.wants_capabilities() => {
                info!(
                    invocations = completion.invocations.len(),
                    "turn needs capabilities"
                );
                Classification::DualPath(completion)
            }
            Ok(completion) => {
                info!("turn answered directly");
                Classification::Direct(completion.content)
            }
            Err(e) => {
                warn!(error = %e, "classifier call failed, degrading to direct apology");
                Classification::Failed(self.apology.clone())
            }
        }
    }
}
