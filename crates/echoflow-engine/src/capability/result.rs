//! The outcome of one capability invocation.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};

/// Outcome of executing one [`crate::CapabilityInvocation`].
///
/// Produced exactly once per invocation by
/// [`crate::CapabilityRegistry::execute`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time of validation plus execution.
    #[serde(serialize_with = "serialize_secs")]
    pub execution_time: Duration,
}

impl CapabilityResult {
    pub fn success(data: Value, execution_time: Duration) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            execution_time,
        }
    }

    pub fn failure(error: impl Into<String>, execution_time: Duration) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            execution_time,
        }
    }

    /// JSON body fed back to the model as the `tool` message content.
    pub fn to_tool_content(&self) -> String {
        json!({
            "success": self.success,
            "data": self.data,
            "error": self.error,
            "execution_time": self.execution_time.as_secs_f64(),
        })
        .to_string()
    }

    /// Human-readable rendering of `data`: strings as-is, everything else as
    /// compact JSON.
    pub fn data_text(&self) -> Option<String> {
        self.data.as_ref().map(|data| match data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}
