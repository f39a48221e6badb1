//! Capability registry.
//!
//! An explicit registry instance is handed to the
//! [`crate::Orchestrator`] at construction, so each deployment chooses its own
//! capability set.  Registration order is preserved and is the order in which
//! schemas are offered to the model.
//!
//! # Example
//!
//! ```rust
//! # use std::sync::Arc;
//! # use async_trait::async_trait;
//! # use serde_json::{Value, json};
//! # use echoflow_engine::capability::*;
//! struct Clock(CapabilityDefinition);
//!
//! #[async_trait]
//! impl Capability for Clock {
//!     fn definition(&self) -> &CapabilityDefinition { &self.0 }
//!     async fn execute(&self, _args: Arguments) -> Result<Value, CapabilityError> {
//!         Ok(json!("12:00"))
//!     }
//! }
//!
//! let registry = CapabilityRegistry::new();
//! registry.register(Arc::new(Clock(CapabilityDefinition::new("clock", "Current time"))));
//! assert_eq!(registry.list(), vec!["clock".to_owned()]);
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    Arguments, Capability, CapabilityDefinition, CapabilityError, CapabilityResult,
    validate_arguments,
};
use crate::llm::types::CapabilityInvocation;

/// Owns the set of registered capabilities and dispatches calls to them.
///
/// Methods take `&self`; the registry can be shared behind an `Arc` and still
/// be updated at runtime.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: RwLock<Vec<Arc<dyn Capability>>>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, replacing (in place) any existing one with the
    /// same name.
    pub fn register(&self, capability: Arc<dyn Capability>) {
        let name = capability.definition().name.clone();
        let mut entries = self.write();

        if let Some(slot) = entries.iter_mut().find(|c| c.definition().name == name) {
            warn!(capability = %name, "capability already registered, replacing");
            *slot = capability;
        } else {
            info!(capability = %name, "capability registered");
            entries.push(capability);
        }
    }

    /// Remove a capability.  Returns whether it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|c| c.definition().name != name);

        let removed = entries.len() != before;
        if removed {
            info!(capability = %name, "capability unregistered");
        } else {
            warn!(capability = %name, "cannot unregister unknown capability");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.read()
            .iter()
            .find(|c| c.definition().name == name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names of all registered capabilities, in registration order.
    pub fn list(&self) -> Vec<String> {
        self.read()
            .iter()
            .map(|c| c.definition().name.clone())
            .collect()
    }

    pub fn definition(&self, name: &str) -> Option<CapabilityDefinition> {
        self.get(name).map(|c| c.definition().clone())
    }

    /// Definitions of all registered capabilities, in registration order.
    pub fn schemas(&self) -> Vec<CapabilityDefinition> {
        self.read()
            .iter()
            .map(|c| c.definition().clone())
            .collect()
    }

    /// Function-calling schemas (`{name, description, parameters}`) of all
    /// registered capabilities.
    pub fn function_schemas(&self) -> Vec<Value> {
        self.read()
            .iter()
            .map(|c| c.definition().to_function_schema())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove every capability.
    pub fn clear(&self) {
        let mut entries = self.write();
        info!(count = entries.len(), "clearing capability registry");
        entries.clear();
    }

    /// Resolve, validate and run a capability.
    ///
    /// Never fails: an unknown name, a validation violation, an error from
    /// the body and a panic in the body all produce a failed
    /// [`CapabilityResult`].  The body is not entered unless validation
    /// passes.  `execution_time` spans validation and execution.
    pub async fn execute(&self, name: &str, args: Arguments) -> CapabilityResult {
        let started = Instant::now();
        let outcome = self.dispatch(name, args).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(data) => {
                info!(
                    capability = %name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "capability succeeded"
                );
                CapabilityResult::success(data, elapsed)
            }
            Err(e) => {
                warn!(
                    capability = %name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "capability failed"
                );
                CapabilityResult::failure(e.to_string(), elapsed)
            }
        }
    }

    /// Parse the raw arguments of `invocation` and [`execute`](Self::execute)
    /// it.  Malformed argument JSON fails only this invocation.
    pub async fn execute_invocation(&self, invocation: &CapabilityInvocation) -> CapabilityResult {
        let started = Instant::now();
        match invocation.parse_arguments() {
            Ok(args) => self.execute(&invocation.name, args).await,
            Err(e) => {
                warn!(
                    capability = %invocation.name,
                    id = %invocation.id,
                    error = %e,
                    "unparseable arguments"
                );
                CapabilityResult::failure(e.to_string(), started.elapsed())
            }
        }
    }

    async fn dispatch(&self, name: &str, args: Arguments) -> Result<Value, CapabilityError> {
        let capability = self.get(name).ok_or_else(|| CapabilityError::Unknown {
            name: name.to_owned(),
        })?;

        let args = validate_arguments(capability.definition(), args)?;
        debug!(capability = %name, "arguments validated, executing");

        AssertUnwindSafe(capability.execute(args))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(CapabilityError::Panicked {
                    reason: panic_message(payload.as_ref()),
                })
            })
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<dyn Capability>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<dyn Capability>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.list())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::capability::{ParamType, ParameterSpec};

    /// Counts how often its body runs.
    struct Spy {
        def: CapabilityDefinition,
        calls: AtomicUsize,
        behavior: Behavior,
    }

    enum Behavior {
        Echo,
        Fail,
        Panic,
    }

    impl Spy {
        fn new(name: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                def: CapabilityDefinition::new(name, "spy").param(
                    ParameterSpec::new("query", ParamType::String, "query").required(),
                ),
                calls: AtomicUsize::new(0),
                behavior,
            })
        }
    }

    #[async_trait]
    impl Capability for Spy {
        fn definition(&self) -> &CapabilityDefinition {
            &self.def
        }

        async fn execute(&self, args: Arguments) -> Result<Value, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Echo => Ok(args["query"].clone()),
                Behavior::Fail => Err(CapabilityError::ExecutionFailed {
                    reason: "backend down".into(),
                }),
                Behavior::Panic => panic!("spy exploded"),
            }
        }
    }

    #[test]
    fn register_list_get_unregister() {
        let registry = CapabilityRegistry::new();
        registry.register(Spy::new("b", Behavior::Echo));
        registry.register(Spy::new("a", Behavior::Echo));

        assert_eq!(registry.list(), vec!["b", "a"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.get("a").is_some());
        assert!(registry.get("c").is_none());

        assert!(registry.unregister("b"));
        assert!(!registry.unregister("b"));
        assert_eq!(registry.list(), vec!["a"]);
    }

    #[test]
    fn re_registering_replaces_in_place() {
        let registry = CapabilityRegistry::new();
        registry.register(Spy::new("a", Behavior::Echo));
        registry.register(Spy::new("b", Behavior::Echo));
        registry.register(Spy::new("a", Behavior::Fail));

        assert_eq!(registry.list(), vec!["a", "b"]);
    }

    #[test]
    fn schemas_follow_registration_order() {
        let registry = CapabilityRegistry::new();
        registry.register(Spy::new("first", Behavior::Echo));
        registry.register(Spy::new("second", Behavior::Echo));

        let schemas = registry.function_schemas();
        assert_eq!(schemas[0]["name"], "first");
        assert_eq!(schemas[1]["parameters"]["required"], json!(["query"]));
    }

    #[tokio::test]
    async fn execute_success() {
        let registry = CapabilityRegistry::new();
        registry.register(Spy::new("echo", Behavior::Echo));

        let args = json!({"query": "hi"}).as_object().cloned().unwrap();
        let result = registry.execute("echo", args).await;
        assert!(result.success);
        assert_eq!(result.data, Some(json!("hi")));
    }

    #[tokio::test]
    async fn missing_required_never_enters_body() {
        let registry = CapabilityRegistry::new();
        let spy = Spy::new("echo", Behavior::Echo);
        registry.register(spy.clone());

        let result = registry.execute("echo", Arguments::new()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("missing required parameter"));
        assert_eq!(spy.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_capability_is_a_failed_result() {
        let registry = CapabilityRegistry::new();
        let result = registry.execute("nope", Arguments::new()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("unknown capability: `nope`"));
    }

    #[tokio::test]
    async fn body_error_is_a_failed_result() {
        let registry = CapabilityRegistry::new();
        registry.register(Spy::new("flaky", Behavior::Fail));

        let args = json!({"query": "x"}).as_object().cloned().unwrap();
        let result = registry.execute("flaky", args).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("backend down"));
    }

    #[tokio::test]
    async fn body_panic_is_a_failed_result() {
        let registry = CapabilityRegistry::new();
        registry.register(Spy::new("bomb", Behavior::Panic));

        let args = json!({"query": "x"}).as_object().cloned().unwrap();
        let result = registry.execute("bomb", args).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("spy exploded"));
    }

    #[tokio::test]
    async fn malformed_invocation_arguments_fail_only_that_call() {
        let registry = CapabilityRegistry::new();
        let spy = Spy::new("echo", Behavior::Echo);
        registry.register(spy.clone());

        let bad = CapabilityInvocation::new("call_1", "echo", "{not json");
        let result = registry.execute_invocation(&bad).await;
        assert!(!result.success);
        assert_eq!(spy.calls.load(Ordering::SeqCst), 0);

        let good = CapabilityInvocation::new("call_2", "echo", r#"{"query":"ok"}"#);
        assert!(registry.execute_invocation(&good).await.success);
    }
}
