//! End-to-end turn scenarios.
//!
//! The language model is a scripted provider that replays queued answers
//! and records every request; capabilities are spies.  Timing-sensitive
//! tests run on tokio's paused clock so a 12-second capability finishes
//! instantly and deterministically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::Instant;

use echoflow_engine::testing::{ScriptedProvider, invoke, timeout};
use echoflow_engine::{
    Arguments, Capability, CapabilityDefinition, CapabilityError, CapabilityInvocation,
    CapabilityRegistry, Completion, EngineConfig, EventSink, Message, Orchestrator, ParamType,
    ParameterSpec, Role, TurnEvent, TurnOutcome, TurnState,
};

// ═══════════════════════════════════════════════════════════════════════
//  Test doubles
// ═══════════════════════════════════════════════════════════════════════

enum Behavior {
    Return(Value),
    Fail,
    /// Fails on the first call, then returns the value.
    FailOnce(Value),
    Sleep(Duration, Value),
}

/// Counts body invocations and remembers when the last one finished.
struct Spy {
    def: CapabilityDefinition,
    behavior: Behavior,
    calls: AtomicUsize,
    finished_at: Mutex<Option<Instant>>,
}

impl Spy {
    fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            def: CapabilityDefinition::new(name, format!("{name} spy")),
            behavior,
            calls: AtomicUsize::new(0),
            finished_at: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for Spy {
    fn definition(&self) -> &CapabilityDefinition {
        &self.def
    }

    async fn execute(&self, _args: Arguments) -> Result<Value, CapabilityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let unreachable = || CapabilityError::ExecutionFailed {
            reason: "calendar backend unreachable".into(),
        };
        let outcome = match &self.behavior {
            Behavior::Return(v) => Ok(v.clone()),
            Behavior::Fail => Err(unreachable()),
            Behavior::FailOnce(_) if call == 0 => Err(unreachable()),
            Behavior::FailOnce(v) => Ok(v.clone()),
            Behavior::Sleep(d, v) => {
                tokio::time::sleep(*d).await;
                Ok(v.clone())
            }
        };
        *self.finished_at.lock().unwrap() = Some(Instant::now());
        outcome
    }
}

fn engine(provider: &Arc<ScriptedProvider>, spies: &[Arc<Spy>]) -> Orchestrator {
    engine_with(provider, spies, EngineConfig::default())
}

fn engine_with(
    provider: &Arc<ScriptedProvider>,
    spies: &[Arc<Spy>],
    config: EngineConfig,
) -> Orchestrator {
    let registry = Arc::new(CapabilityRegistry::new());
    for spy in spies {
        registry.register(spy.clone());
    }
    Orchestrator::new(provider.clone(), registry, config).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════
//  Scenarios
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn calendar_turn_settles_and_fuses() {
    let calendar = Spy::new("get_calendar", Behavior::Return(json!("10am meeting")));
    let provider = Arc::new(
        ScriptedProvider::new()
            .tool_reply(Ok(invoke("call_1", "get_calendar", "{}")))
            .tool_reply(Ok(Completion::text("You have a 10am meeting today.")))
            .plain_reply(Ok(Completion::text("Ooh, let me peek at your calendar!")))
            .plain_reply(Ok(Completion::text("Found it! You've got a 10am meeting today."))),
    );
    let orch = engine(&provider, &[calendar.clone()]);

    let mut immediates = Vec::new();
    let mut patience = Vec::new();
    let response = orch
        .run_turn(
            vec![Message::user("check my calendar")],
            |t| immediates.push(t.to_owned()),
            |t| patience.push(t.to_owned()),
        )
        .await
        .unwrap();

    assert_eq!(immediates, vec!["Ooh, let me peek at your calendar!"]);
    assert!(patience.is_empty());
    assert!(response.used_capability);
    assert_eq!(response.outcome, TurnOutcome::Settled);
    assert_eq!(response.rounds, 1);
    assert_eq!(calendar.calls(), 1);
    assert!(response.final_text.as_deref().unwrap().contains("10am meeting"));
    assert_eq!(response.reply(), response.final_text.as_deref().unwrap());
    assert_eq!(
        response.states,
        vec![
            TurnState::Init,
            TurnState::Classify,
            TurnState::DualPath,
            TurnState::AwaitImmediate,
            TurnState::AwaitCapability,
            TurnState::Fuse,
            TurnState::Done,
        ]
    );

    // system, user, assistant(invocation), tool, assistant(final)
    let roles: Vec<Role> = response.conversation.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(
        response.conversation.last().unwrap().content,
        "Found it! You've got a 10am meeting today."
    );

    let requests = provider.requests();
    let fusion_prompt = &requests.last().unwrap().messages[1].content;
    assert!(fusion_prompt.contains("10am meeting"));
    assert!(fusion_prompt.contains("Ooh, let me peek at your calendar!"));
    assert!(fusion_prompt.contains("check my calendar"));
}

#[tokio::test]
async fn fusion_only_sees_the_settled_round() {
    let flaky = Spy::new("get_calendar", Behavior::FailOnce(json!("10am meeting")));
    let provider = Arc::new(
        ScriptedProvider::new()
            .tool_reply(Ok(invoke("call_1", "get_calendar", "{}")))
            .tool_reply(Ok(invoke("call_2", "get_calendar", "{}")))
            .tool_reply(Ok(Completion::text("You have a 10am meeting.")))
            .plain_reply(Ok(Completion::text("Let me look.")))
            .plain_reply(Ok(Completion::text("You've got a 10am meeting."))),
    );
    let orch = engine(&provider, &[flaky.clone()]);

    let response = orch
        .run_turn(vec![Message::user("check my calendar")], |_| {}, |_| {})
        .await
        .unwrap();

    assert_eq!(response.outcome, TurnOutcome::Settled);
    assert_eq!(response.rounds, 2);
    assert_eq!(flaky.calls(), 2);

    // The failed first attempt stays in the conversation for the model.
    let tool_messages = response
        .conversation
        .iter()
        .filter(|m| m.role == Role::Tool)
        .count();
    assert_eq!(tool_messages, 2);

    let requests = provider.requests();
    let fusion_prompt = &requests.last().unwrap().messages[1].content;
    assert!(fusion_prompt.contains("- get_calendar: 10am meeting"), "{fusion_prompt}");
    assert!(!fusion_prompt.contains("Could not be completed"), "{fusion_prompt}");
}

#[tokio::test]
async fn classifier_timeout_degrades_to_direct_apology() {
    let calendar = Spy::new("get_calendar", Behavior::Return(json!("10am meeting")));
    let provider = Arc::new(ScriptedProvider::new().tool_reply(timeout()));
    let orch = engine(&provider, &[calendar.clone()]);

    let mut immediates = Vec::new();
    let mut patience_calls = 0;
    let response = orch
        .run_turn(
            vec![Message::user("check my calendar")],
            |t| immediates.push(t.to_owned()),
            |_| patience_calls += 1,
        )
        .await
        .unwrap();

    let apology = EngineConfig::default().replies.classifier_apology;
    assert!(!response.used_capability);
    assert_eq!(response.outcome, TurnOutcome::ClassifierFailed);
    assert_eq!(response.immediate_text, apology);
    assert!(response.final_text.is_none());
    assert_eq!(immediates, vec![apology]);
    assert_eq!(patience_calls, 0);
    assert_eq!(calendar.calls(), 0);
}

#[tokio::test]
async fn failing_capability_exceeds_after_five_schema_calls() {
    let calendar = Spy::new("get_calendar", Behavior::Fail);
    let provider = Arc::new(
        ScriptedProvider::new()
            .tool_reply(Ok(invoke("call_1", "get_calendar", "{}")))
            .tool_reply(Ok(invoke("call_2", "get_calendar", "{}")))
            .tool_reply(Ok(invoke("call_3", "get_calendar", "{}")))
            .tool_reply(Ok(invoke("call_4", "get_calendar", "{}")))
            .tool_reply(Ok(invoke("call_5", "get_calendar", "{}")))
            .tool_reply(Ok(invoke("call_6", "get_calendar", "{}")))
            .plain_reply(Ok(Completion::text("Checking!"))),
    );
    let orch = engine(&provider, &[calendar.clone()]);

    let mut immediate_calls = 0;
    let response = orch
        .run_turn(
            vec![Message::user("check my calendar")],
            |_| immediate_calls += 1,
            |_| {},
        )
        .await
        .unwrap();

    assert_eq!(response.outcome, TurnOutcome::Exceeded);
    assert_eq!(
        response.final_text.as_deref(),
        Some(EngineConfig::default().replies.loop_apology.as_str())
    );
    assert_eq!(provider.tool_request_count(), 5);
    assert_eq!(response.rounds, 5);
    assert_eq!(calendar.calls(), 5);
    assert_eq!(immediate_calls, 1);
    assert_eq!(response.states[response.states.len() - 2], TurnState::Degrade);
    // No fusion call: only the immediate request went out plain.
    assert_eq!(provider.requests().len() - provider.tool_request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn twelve_second_capability_gets_one_patience_message() {
    let slow = Spy::new(
        "get_calendar",
        Behavior::Sleep(Duration::from_secs(12), json!("10am meeting")),
    );
    let provider = Arc::new(
        ScriptedProvider::new()
            .tool_reply(Ok(invoke("call_1", "get_calendar", "{}")))
            .tool_reply(Ok(Completion::text("You have a 10am meeting.")))
            .plain_reply(Ok(Completion::text("On it!")))
            .plain_reply(Ok(Completion::text("Got it, 10am meeting."))),
    );
    let orch = engine(&provider, &[slow.clone()]);

    let started = Instant::now();
    let mut immediate_at = Vec::new();
    let mut patience = Vec::new();
    let response = orch
        .run_turn(
            vec![Message::user("check my calendar")],
            |_| immediate_at.push(Instant::now()),
            |t| patience.push((t.to_owned(), Instant::now())),
        )
        .await
        .unwrap();

    let ten_second_message = EngineConfig::default().patience.thresholds[0].message.clone();
    let finished_at = slow.finished_at.lock().unwrap().unwrap();

    assert_eq!(patience.len(), 1);
    assert_eq!(patience[0].0, ten_second_message);
    assert!(patience[0].1 < finished_at);
    assert!(patience[0].1 - started >= Duration::from_secs(10));

    assert_eq!(immediate_at.len(), 1);
    assert!(immediate_at[0] < finished_at);

    assert!(response.capability_wall_time >= Duration::from_secs(12));
    assert!(response.capability_wall_time < Duration::from_secs(13));
}

#[tokio::test(start_paused = true)]
async fn patience_is_silent_for_fast_capabilities() {
    let quick = Spy::new(
        "get_calendar",
        Behavior::Sleep(Duration::from_secs(3), json!("free all day")),
    );
    let provider = Arc::new(
        ScriptedProvider::new()
            .tool_reply(Ok(invoke("call_1", "get_calendar", "{}")))
            .tool_reply(Ok(Completion::text("You're free.")))
            .plain_reply(Ok(Completion::text("On it!")))
            .plain_reply(Ok(Completion::text("You're free all day."))),
    );
    let orch = engine(&provider, &[quick]);

    let mut patience_calls = 0;
    orch.run_turn(vec![Message::user("am I free?")], |_| {}, |_| patience_calls += 1)
        .await
        .unwrap();

    // Let any leftover timer run; a cancelled monitor must stay quiet.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(patience_calls, 0);
}

#[tokio::test]
async fn events_publish_immediate_before_final() {
    let calendar = Spy::new("get_calendar", Behavior::Return(json!("10am meeting")));
    let provider = Arc::new(
        ScriptedProvider::new()
            .tool_reply(Ok(invoke("call_1", "get_calendar", "{}")))
            .tool_reply(Ok(Completion::text("10am meeting.")))
            .plain_reply(Ok(Completion::text("Checking!")))
            .plain_reply(Ok(Completion::text("You have a 10am meeting."))),
    );
    let orch = engine(&provider, &[calendar]);

    let (sink, mut rx) = EventSink::channel();
    let response = orch
        .run_turn_with_events(vec![Message::user("check my calendar")], sink)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            TurnEvent::Immediate("Checking!".into()),
            TurnEvent::Final("You have a 10am meeting.".into()),
        ]
    );
    assert_eq!(response.immediate_text, "Checking!");
}

#[tokio::test]
async fn direct_turn_delivers_once_without_final() {
    let calendar = Spy::new("get_calendar", Behavior::Return(json!("10am meeting")));
    let provider = Arc::new(
        ScriptedProvider::new().tool_reply(Ok(Completion::text("Hi! How can I help?"))),
    );
    let orch = engine(&provider, &[calendar]);

    let (sink, mut rx) = EventSink::channel();
    let response = orch
        .run_turn_with_events(vec![Message::user("hello")], sink)
        .await
        .unwrap();

    assert_eq!(rx.recv().await, Some(TurnEvent::Immediate("Hi! How can I help?".into())));
    assert_eq!(rx.recv().await, None);
    assert_eq!(response.outcome, TurnOutcome::Direct);
    assert_eq!(response.reply(), "Hi! How can I help?");
    assert_eq!(response.capability_wall_time, Duration::ZERO);
}

#[tokio::test]
async fn sibling_failure_is_isolated_within_a_turn() {
    let calendar = Spy::new("get_calendar", Behavior::Return(json!("10am meeting")));
    let mail = Spy::new("send_email", Behavior::Fail);
    let both = Completion::invocations(vec![
        CapabilityInvocation::new("call_1", "send_email", "{}"),
        CapabilityInvocation::new("call_2", "get_calendar", "{}"),
    ]);
    let provider = Arc::new(
        ScriptedProvider::new()
            .tool_reply(Ok(both))
            .tool_reply(Ok(Completion::text("Calendar done, email failed.")))
            .plain_reply(Ok(Completion::text("On it!")))
            .plain_reply(timeout()),
    );
    let orch = engine(&provider, &[calendar.clone(), mail.clone()]);

    let response = orch
        .run_turn(vec![Message::user("email Bob and check my day")], |_| {}, |_| {})
        .await
        .unwrap();

    assert_eq!(calendar.calls(), 1);
    assert_eq!(mail.calls(), 1);

    let tool_messages: Vec<&Message> = response
        .conversation
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect();
    assert_eq!(tool_messages.len(), 2);
    let first: Value = serde_json::from_str(&tool_messages[0].content).unwrap();
    let second: Value = serde_json::from_str(&tool_messages[1].content).unwrap();
    assert_eq!(first["success"], false);
    assert_eq!(second["success"], true);
    assert_eq!(second["data"], "10am meeting");

    // Fusion call failed: the template carries the successful data verbatim.
    let prefix = EngineConfig::default().replies.fusion_prefix;
    assert_eq!(
        response.final_text.as_deref(),
        Some(format!("{prefix} 10am meeting").as_str())
    );
}

#[tokio::test]
async fn loop_completion_failure_degrades_without_retry() {
    let calendar = Spy::new("get_calendar", Behavior::Return(json!("10am meeting")));
    let provider = Arc::new(
        ScriptedProvider::new()
            .tool_reply(Ok(invoke("call_1", "get_calendar", "{}")))
            .tool_reply(timeout())
            .plain_reply(Ok(Completion::text("On it!"))),
    );
    let orch = engine(&provider, &[calendar]);

    let response = orch
        .run_turn(vec![Message::user("check my calendar")], |_| {}, |_| {})
        .await
        .unwrap();

    assert_eq!(response.outcome, TurnOutcome::Failed);
    assert_eq!(provider.tool_request_count(), 2);
    let apology = EngineConfig::default().replies.loop_apology;
    assert_eq!(response.final_text, Some(apology));
}

#[tokio::test]
async fn missing_required_argument_never_runs_the_body() {
    let registry = Arc::new(CapabilityRegistry::new());
    let strict = Arc::new(StrictSpy {
        def: CapabilityDefinition::new("send_email", "Send an email").param(
            ParameterSpec::new("to", ParamType::String, "Recipient").required(),
        ),
        calls: AtomicUsize::new(0),
    });
    registry.register(strict.clone());

    let provider = Arc::new(
        ScriptedProvider::new()
            .tool_reply(Ok(invoke("call_1", "send_email", r#"{"subject":"hi"}"#)))
            .tool_reply(Ok(Completion::text("I need a recipient.")))
            .plain_reply(Ok(Completion::text("Sending!")))
            .plain_reply(Ok(Completion::text("Who should I send it to?"))),
    );
    let orch = Orchestrator::new(provider.clone(), registry, EngineConfig::default()).unwrap();

    let response = orch
        .run_turn(vec![Message::user("send an email")], |_| {}, |_| {})
        .await
        .unwrap();

    assert_eq!(strict.calls.load(Ordering::SeqCst), 0);
    let tool = response
        .conversation
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert!(tool.content.contains("missing required parameter"));
}

struct StrictSpy {
    def: CapabilityDefinition,
    calls: AtomicUsize,
}

#[async_trait]
impl Capability for StrictSpy {
    fn definition(&self) -> &CapabilityDefinition {
        &self.def
    }

    async fn execute(&self, _args: Arguments) -> Result<Value, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!("sent"))
    }
}

#[tokio::test]
async fn function_calling_switch_forces_direct_turns() {
    let calendar = Spy::new("get_calendar", Behavior::Return(json!("10am meeting")));
    let provider = Arc::new(
        ScriptedProvider::new().plain_reply(Ok(Completion::text("I can't check that."))),
    );
    let config = EngineConfig {
        function_calling: false,
        ..EngineConfig::default()
    };
    let orch = engine_with(&provider, &[calendar], config);

    let response = orch
        .run_turn(vec![Message::user("check my calendar")], |_| {}, |_| {})
        .await
        .unwrap();

    assert_eq!(response.outcome, TurnOutcome::Direct);
    assert_eq!(provider.tool_request_count(), 0);
    assert!(!orch.is_function_calling_enabled());
}

#[tokio::test]
async fn capability_schemas_export_function_shape() {
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register(Arc::new(StrictSpy {
        def: CapabilityDefinition::new("send_email", "Send an email")
            .param(ParameterSpec::new("to", ParamType::String, "Recipient").required())
            .param(ParameterSpec::new("urgent", ParamType::Boolean, "Flag")),
        calls: AtomicUsize::new(0),
    }));
    let orch = Orchestrator::new(
        Arc::new(ScriptedProvider::new()),
        registry,
        EngineConfig::default(),
    )
    .unwrap();

    let schemas = orch.function_schemas();
    assert_eq!(schemas.len(), 1);
    assert_eq!(schemas[0]["name"], "send_email");
    assert_eq!(schemas[0]["parameters"]["type"], "object");
    assert_eq!(schemas[0]["parameters"]["properties"]["urgent"]["type"], "boolean");
    assert_eq!(schemas[0]["parameters"]["required"], json!(["to"]));
    assert_eq!(orch.list_capabilities()[0].name, "send_email");
}
