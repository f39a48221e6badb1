//! Fusion: one final reply that picks up where the acknowledgement left off.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Replies;
use crate::executor::InvocationRecord;
use crate::llm::CompletionProvider;
use crate::llm::types::{CompletionRequest, Message, ModelParams};

/// What fusion works from.
#[derive(Debug, Clone, Copy)]
pub struct FusionInput<'a> {
    /// The acknowledgement already spoken to the user.
    pub immediate_text: &'a str,
    pub original_query: &'a str,
    /// Results of the settled round in the order they were requested.
    pub records: &'a [InvocationRecord],
    /// The model's own reply after seeing the results, if any.
    pub draft: Option<&'a str>,
}

pub struct FusionEngine {
    provider: Arc<dyn CompletionProvider>,
    system_prompt: String,
    params: ModelParams,
    replies: Replies,
}

impl FusionEngine {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        system_prompt: impl Into<String>,
        params: ModelParams,
        replies: Replies,
    ) -> Self {
        Self {
            provider,
            system_prompt: system_prompt.into(),
            params,
            replies,
        }
    }

    /// Produce the final reply.  Never fails; a failed or empty fusion call
    /// falls back to [`FusionEngine::template`].
    pub async fn fuse(&self, input: FusionInput<'_>) -> String {
        let request = CompletionRequest::plain(
            vec![
                Message::system(self.system_prompt.clone()),
                Message::user(fusion_prompt(&input)),
            ],
            self.params,
        );
        debug!(results = input.records.len(), "requesting fusion");

        match self.provider.complete(&request).await {
            Ok(completion) if !completion.content.trim().is_empty() => {
                info!("fusion reply ready");
                completion.content.trim().to_owned()
            }
            Ok(_) => {
                warn!("fusion call returned no text, using template");
                self.template(input.records)
            }
            Err(e) => {
                warn!(error = %e, "fusion call failed, using template");
                self.template(input.records)
            }
        }
    }

    /// Deterministic fallback: successful data verbatim behind the
    /// configured prefix, or the apology when nothing succeeded.
    pub fn template(&self, records: &[InvocationRecord]) -> String {
        let successes: Vec<String> = records
            .iter()
            .filter(|r| r.result.success)
            .filter_map(|r| r.result.data_text())
            .filter(|text| !text.is_empty())
            .collect();

        if successes.is_empty() {
            self.replies.fusion_apology.clone()
        } else {
            format!("{} {}", self.replies.fusion_prefix, successes.join(" "))
        }
    }
}

fn fusion_prompt(input: &FusionInput<'_>) -> String {
    let mut summary = String::new();

    let successes: Vec<&InvocationRecord> =
        input.records.iter().filter(|r| r.result.success).collect();
    if !successes.is_empty() {
        summary.push_str("Succeeded:\n");
        for record in &successes {
            let _ = writeln!(
                summary,
                "- {}: {}",
                record.invocation.name,
                record.result.data_text().unwrap_or_default()
            );
        }
    }

    let failures: Vec<&str> = input
        .records
        .iter()
        .filter(|r| !r.result.success)
        .map(|r| r.invocation.name.as_str())
        .collect();
    if !failures.is_empty() {
        let _ = writeln!(summary, "Could not be completed: {}", failures.join(", "));
    }

    if summary.is_empty() {
        summary.push_str("No results came back.\n");
    }

    let mut prompt = format!(
        "Earlier you told the user: \"{}\"\n\n\
         The lookup has now finished.\n\n\
         Original request: {}\n\n\
         Results:\n{summary}",
        input.immediate_text, input.original_query,
    );
    if let Some(draft) = input.draft.filter(|d| !d.trim().is_empty()) {
        let _ = write!(prompt, "\nYour draft answer based on these results: {draft}\n");
    }
    prompt.push_str(
        "\nGive the complete final reply now. Pick up naturally from what you said \
         earlier, as if announcing that you found it. Keep exactly the same tone. \
         Include the successful results accurately. If something could not be \
         completed, say so briefly and lightly without technical details or error \
         messages. Reply with the final answer only.",
    );
    prompt
}
