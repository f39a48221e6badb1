//! The fast path: a short "working on it" line spoken while capabilities run.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info, warn};

use crate::llm::CompletionProvider;
use crate::llm::types::{CompletionRequest, Message, ModelParams, Role, latest_user_text};

/// Earlier user/assistant exchanges included for tone.
const CONTEXT_MESSAGES: usize = 4;

/// Generates the immediate acknowledgement of a dual-path turn.
pub struct ImmediateResponder {
    provider: Arc<dyn CompletionProvider>,
    system_prompt: String,
    params: ModelParams,
    fallbacks: Vec<String>,
    next_fallback: AtomicUsize,
}

impl ImmediateResponder {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        system_prompt: impl Into<String>,
        params: ModelParams,
        fallbacks: Vec<String>,
    ) -> Self {
        Self {
            provider,
            system_prompt: system_prompt.into(),
            params,
            fallbacks,
            next_fallback: AtomicUsize::new(0),
        }
    }

    /// Produce the acknowledgement.  Never fails: a failed or empty call
    /// yields the next phrase from the fallback rotation.
    pub async fn respond(&self, conversation: &[Message]) -> String {
        let request = CompletionRequest::plain(self.prompt(conversation), self.params);

        match self.provider.complete(&request).await {
            Ok(completion) if !completion.content.trim().is_empty() => {
                let text = completion.content.trim().to_owned();
                info!(chars = text.chars().count(), "immediate reply ready");
                text
            }
            Ok(_) => {
                warn!("immediate call returned no text, using fallback phrase");
                self.fallback()
            }
            Err(e) => {
                warn!(error = %e, "immediate call failed, using fallback phrase");
                self.fallback()
            }
        }
    }

    fn prompt(&self, conversation: &[Message]) -> Vec<Message> {
        let user_input = latest_user_text(conversation);

        let mut context: Vec<&Message> = conversation
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .filter(|m| m.tool_calls.is_empty() && !m.content.trim().is_empty())
            .collect();
        if context.last().is_some_and(|m| m.role == Role::User) {
            context.pop();
        }
        let skip = context.len().saturating_sub(CONTEXT_MESSAGES);

        let mut messages = Vec::with_capacity(CONTEXT_MESSAGES + 2);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend(context.into_iter().skip(skip).cloned());
        messages.push(Message::user(format!(
            "The user just asked: \"{user_input}\"\n\n\
             You need to look something up or run an action before you can answer. \
             Reply right away with one short, natural sentence saying you are on it, \
             in your usual tone. Do not answer the question itself and do not use any \
             tools. Reply with the sentence only."
        )));

        debug!(context = messages.len() - 2, "built immediate prompt");
        messages
    }

    fn fallback(&self) -> String {
        if self.fallbacks.is_empty() {
            return String::new();
        }
        let index = self.next_fallback.fetch_add(1, Ordering::Relaxed) % self.fallbacks.len();
        self.fallbacks[index].clone()
    }
}
