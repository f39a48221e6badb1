//! The turn state machine and the engine's public entry point.
//!
//! ```text
//!   Init -> Classify -> Direct -> Done
//!                    -> DualPath -> AwaitImmediate -> AwaitCapability -> Fuse    -> Done
//!                                                                     -> Degrade -> Done
//! ```
//!
//! A dual-path turn runs two units of work concurrently on the caller's
//! task: the immediate acknowledgement, and the capability loop paired with
//! the patience monitor.  The monitor is cancelled the moment the loop
//! reaches its terminal mark.  The only turn-level error is an empty
//! conversation; every collaborator failure is turned into text.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::capability::{CapabilityDefinition, CapabilityRegistry};
use crate::classifier::{Classification, Classifier};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EventSink, TurnEvent};
use crate::executor::{CapabilityExecutor, LoopOutcome};
use crate::fusion::{FusionEngine, FusionInput};
use crate::immediate::ImmediateResponder;
use crate::llm::CompletionProvider;
use crate::llm::types::{Completion, Message, Role, latest_user_text};
use crate::patience::PatienceMonitor;

// ---------------------------------------------------------------------------
// Turn types
// ---------------------------------------------------------------------------

/// States a turn passes through, recorded in [`TurnResponse::states`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Init,
    Classify,
    Direct,
    DualPath,
    AwaitImmediate,
    AwaitCapability,
    Fuse,
    Degrade,
    Done,
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The classifier answered with plain content.
    Direct,
    /// The classifier call failed; the apology was delivered directly.
    ClassifierFailed,
    /// The capability loop settled and the results were fused.
    Settled,
    /// The round bound was hit; the loop apology was delivered.
    Exceeded,
    /// A completion call inside the loop failed; the loop apology was
    /// delivered.
    Failed,
}

/// The result of one turn.
#[derive(Debug, Clone)]
pub struct TurnResponse {
    pub turn_id: Uuid,
    /// The text delivered through the immediate channel.
    pub immediate_text: String,
    /// Present iff `used_capability`.
    pub final_text: Option<String>,
    pub used_capability: bool,
    /// Time spent in the capability loop; zero for direct turns.
    pub capability_wall_time: Duration,
    pub outcome: TurnOutcome,
    /// Capability rounds executed.
    pub rounds: u32,
    pub states: Vec<TurnState>,
    /// The turn's message sequence, ending with the delivered reply.
    pub conversation: Vec<Message>,
}

impl TurnResponse {
    /// The text that answers the user: the final reply of a dual-path turn,
    /// the immediate text otherwise.
    pub fn reply(&self) -> &str {
        self.final_text.as_deref().unwrap_or(&self.immediate_text)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Wires the engine components together.  Holds no per-turn state, so one
/// instance can serve many conversations.
pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    config: EngineConfig,
    classifier: Classifier,
    immediate: ImmediateResponder,
    executor: CapabilityExecutor,
    patience: PatienceMonitor,
    fusion: FusionEngine,
}

impl Orchestrator {
    /// Build an orchestrator around a completion provider and an explicit
    /// capability registry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `config` fails validation.
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        registry: Arc<CapabilityRegistry>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let classifier = Classifier::new(
            Arc::clone(&provider),
            config.classifier,
            config.replies.classifier_apology.clone(),
        );
        let immediate = ImmediateResponder::new(
            Arc::clone(&provider),
            config.system_prompt.clone(),
            config.immediate.params(),
            config.immediate.fallback_phrases.clone(),
        );
        let executor = CapabilityExecutor::new(
            Arc::clone(&provider),
            Arc::clone(&registry),
            config.executor,
            config.max_rounds,
        );
        let patience = PatienceMonitor::new(&config.patience);
        let fusion = FusionEngine::new(
            provider,
            config.system_prompt.clone(),
            config.fusion,
            config.replies.clone(),
        );

        info!(
            capabilities = registry.len(),
            max_rounds = config.max_rounds,
            function_calling = config.function_calling,
            "orchestrator ready"
        );

        Ok(Self {
            registry,
            config,
            classifier,
            immediate,
            executor,
            patience,
            fusion,
        })
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether turns will be offered capability schemas.
    pub fn is_function_calling_enabled(&self) -> bool {
        self.config.function_calling && !self.registry.is_empty()
    }

    /// Registered capability definitions, in the order offered to the model.
    pub fn list_capabilities(&self) -> Vec<CapabilityDefinition> {
        self.registry.schemas()
    }

    /// The function-calling schemas `{name, description, parameters}`.
    pub fn function_schemas(&self) -> Vec<Value> {
        self.registry.function_schemas()
    }

    /// Run one turn, delivering intermediate text through two callbacks.
    ///
    /// `on_immediate` is called exactly once, before this returns.
    /// `on_patience` is called for each patience threshold crossed while
    /// capabilities run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyConversation`] if `messages` is empty.
    pub async fn run_turn<I, P>(
        &self,
        messages: Vec<Message>,
        mut on_immediate: I,
        mut on_patience: P,
    ) -> Result<TurnResponse>
    where
        I: FnMut(&str) + Send,
        P: FnMut(&str) + Send,
    {
        let (sink, mut events) = EventSink::channel();
        let turn = self.run_turn_with_events(messages, sink);
        let deliver = async {
            while let Some(event) = events.recv().await {
                match event {
                    TurnEvent::Immediate(text) => on_immediate(&text),
                    TurnEvent::Patience(text) => on_patience(&text),
                    TurnEvent::Final(_) => {}
                }
            }
        };

        let (response, ()) = tokio::join!(turn, deliver);
        response
    }

    /// Run one turn, publishing intermediate and final text into `events`.
    ///
    /// A direct turn publishes a single [`TurnEvent::Immediate`].  A
    /// dual-path turn publishes `Immediate`, any number of `Patience`, and
    /// one `Final`, with `Immediate` always before `Final`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyConversation`] if `messages` is empty.
    pub async fn run_turn_with_events(
        &self,
        messages: Vec<Message>,
        events: EventSink,
    ) -> Result<TurnResponse> {
        if messages.is_empty() {
            return Err(EngineError::EmptyConversation);
        }

        let turn_id = Uuid::now_v7();
        let span = info_span!("turn", %turn_id);
        self.drive(turn_id, messages, &events).instrument(span).await
    }

    async fn drive(
        &self,
        turn_id: Uuid,
        messages: Vec<Message>,
        events: &EventSink,
    ) -> Result<TurnResponse> {
        let mut turn = Turn::new(turn_id, self.with_system_prompt(messages));
        info!(messages = turn.conversation.len(), "turn started");

        let schemas = if self.is_function_calling_enabled() {
            self.registry.schemas()
        } else {
            Vec::new()
        };

        turn.enter(TurnState::Classify);
        let first = match self.classifier.classify(&turn.conversation, &schemas).await {
            Classification::Direct(text) => {
                return Ok(turn.finish_direct(text, TurnOutcome::Direct, events));
            }
            Classification::Failed(apology) => {
                return Ok(turn.finish_direct(apology, TurnOutcome::ClassifierFailed, events));
            }
            Classification::DualPath(first) => first,
        };

        turn.enter(TurnState::DualPath);
        self.dual_path(turn, first, &schemas, events).await
    }

    async fn dual_path(
        &self,
        mut turn: Turn,
        first: Completion,
        schemas: &[CapabilityDefinition],
        events: &EventSink,
    ) -> Result<TurnResponse> {
        let snapshot = turn.conversation.clone();
        let cancel = CancellationToken::new();

        let immediate_path = async {
            let text = self.immediate.respond(&snapshot).await;
            events.immediate(&text);
            text
        };

        let conversation = &mut turn.conversation;
        let capability_path = async {
            let started = Instant::now();
            let run = async {
                let report = self.executor.run(conversation, first, schemas).await;
                cancel.cancel();
                report
            };
            let watch = self
                .patience
                .watch(started, cancel.clone(), |t| events.patience(&t.message));
            let (report, fired) = tokio::join!(run, watch);
            debug!(patience_messages = fired, "capability path finished");
            report
        };

        let (immediate_text, report) = tokio::join!(immediate_path, capability_path);
        turn.enter(TurnState::AwaitImmediate);
        turn.enter(TurnState::AwaitCapability);

        let (final_text, outcome) = match &report.outcome {
            LoopOutcome::Settled(draft) => {
                turn.enter(TurnState::Fuse);
                let text = self
                    .fusion
                    .fuse(FusionInput {
                        immediate_text: &immediate_text,
                        original_query: latest_user_text(&turn.conversation),
                        records: &report.records,
                        draft: Some(draft),
                    })
                    .await;
                (text, TurnOutcome::Settled)
            }
            LoopOutcome::Exceeded => {
                turn.enter(TurnState::Degrade);
                (self.config.replies.loop_apology.clone(), TurnOutcome::Exceeded)
            }
            LoopOutcome::Failed(_) => {
                turn.enter(TurnState::Degrade);
                (self.config.replies.loop_apology.clone(), TurnOutcome::Failed)
            }
        };

        events.final_reply(&final_text);
        turn.conversation.push(Message::assistant(final_text.clone()));
        turn.enter(TurnState::Done);

        info!(
            outcome = ?outcome,
            rounds = report.rounds,
            wall_ms = report.elapsed.as_millis() as u64,
            "turn finished"
        );

        Ok(TurnResponse {
            turn_id: turn.id,
            immediate_text,
            final_text: Some(final_text),
            used_capability: true,
            capability_wall_time: report.elapsed,
            outcome,
            rounds: report.rounds,
            states: turn.states,
            conversation: turn.conversation,
        })
    }

    fn with_system_prompt(&self, mut messages: Vec<Message>) -> Vec<Message> {
        let starts_with_system = messages.first().is_some_and(|m| m.role == Role::System);
        if !starts_with_system && !self.config.system_prompt.is_empty() {
            messages.insert(0, Message::system(self.config.system_prompt.clone()));
        }
        messages
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("max_rounds", &self.config.max_rounds)
            .field("function_calling", &self.config.function_calling)
            .finish_non_exhaustive()
    }
}

/// Per-turn bookkeeping, owned by exactly one `drive` call.
struct Turn {
    id: Uuid,
    conversation: Vec<Message>,
    states: Vec<TurnState>,
}

impl Turn {
    fn new(id: Uuid, conversation: Vec<Message>) -> Self {
        Self {
            id,
            conversation,
            states: vec![TurnState::Init],
        }
    }

    fn enter(&mut self, state: TurnState) {
        debug!(?state, "turn state");
        self.states.push(state);
    }

    fn finish_direct(
        mut self,
        text: String,
        outcome: TurnOutcome,
        events: &EventSink,
    ) -> TurnResponse {
        self.enter(TurnState::Direct);
        events.immediate(&text);
        self.conversation.push(Message::assistant(text.clone()));
        self.enter(TurnState::Done);
        info!(outcome = ?outcome, "turn finished");

        TurnResponse {
            turn_id: self.id,
            immediate_text: text,
            final_text: None,
            used_capability: false,
            capability_wall_time: Duration::ZERO,
            outcome,
            rounds: 0,
            states: self.states,
            conversation: self.conversation,
        }
    }
}
