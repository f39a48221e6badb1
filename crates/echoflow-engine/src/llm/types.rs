//! Core types for language-model interaction.
//!
//! These types are provider-agnostic; [`super::client`] translates them into
//! the OpenAI Chat Completions wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::{Arguments, CapabilityDefinition, CapabilityError};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions that shape model behavior.
    System,
    /// Input from the human user.
    User,
    /// Output from the model.
    Assistant,
    /// Result of a capability invocation, fed back to the model.
    Tool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    /// Text content.  For [`Role::Tool`] messages this is the serialized
    /// [`crate::CapabilityResult`]; for assistant messages carrying only
    /// invocations it may be empty.
    #[serde(default)]
    pub content: String,

    /// Invocations requested by the assistant, in model order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<CapabilityInvocation>,

    /// The invocation this `tool` message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// An assistant message requesting capability invocations.
    pub fn assistant_invocations(
        content: impl Into<String>,
        invocations: Vec<CapabilityInvocation>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: invocations,
            tool_call_id: None,
        }
    }

    /// A tool message answering the invocation with id `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Content of the most recent user message, or `""` if there is none.
pub fn latest_user_text(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map_or("", |m| m.content.as_str())
}

// ---------------------------------------------------------------------------
// Invocations
// ---------------------------------------------------------------------------

/// A request from the model to run a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInvocation {
    /// Unique within a turn; tool messages refer back to it.
    pub id: String,
    pub name: String,
    /// Arguments exactly as the model produced them (a JSON object string).
    pub arguments: String,
}

impl CapabilityInvocation {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the raw arguments into a key/value map.
    ///
    /// Empty or whitespace-only strings count as `{}`.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidArguments`] when the string is not
    /// a JSON object.
    pub fn parse_arguments(&self) -> Result<Arguments, CapabilityError> {
        if self.arguments.trim().is_empty() {
            return Ok(Arguments::new());
        }

        let value: Value =
            serde_json::from_str(&self.arguments).map_err(|e| CapabilityError::InvalidArguments {
                capability: self.name.clone(),
                reason: e.to_string(),
            })?;

        match value {
            Value::Object(map) => Ok(map),
            other => Err(CapabilityError::InvalidArguments {
                capability: self.name.clone(),
                reason: format!("expected a JSON object, got {other}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Completion request / response
// ---------------------------------------------------------------------------

/// How the model may use the attached capability schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model decides.
    Auto,
    /// The model must not invoke anything.
    None,
    /// The model must invoke at least one capability.
    Required,
}

impl ToolChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::None => "none",
            Self::Required => "required",
        }
    }
}

/// Sampling parameters for one completion call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            max_tokens: Some(1000),
            top_p: None,
        }
    }
}

/// A full request to the completion collaborator.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier; empty means the provider's default.
    pub model: String,
    pub messages: Vec<Message>,
    /// Capability schemas the model may invoke.
    pub tools: Vec<CapabilityDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub params: ModelParams,
}

impl CompletionRequest {
    /// A request without capability schemas.
    pub fn plain(messages: Vec<Message>, params: ModelParams) -> Self {
        Self {
            model: String::new(),
            messages,
            tools: Vec::new(),
            tool_choice: None,
            params,
        }
    }

    /// A request with capability schemas attached and `tool_choice=auto`.
    pub fn with_tools(
        messages: Vec<Message>,
        tools: Vec<CapabilityDefinition>,
        params: ModelParams,
    ) -> Self {
        Self {
            model: String::new(),
            messages,
            tools,
            tool_choice: Some(ToolChoice::Auto),
            params,
        }
    }

    /// Whether capability schemas are attached.
    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }
}

/// What the model answered: text, invocations, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub invocations: Vec<CapabilityInvocation>,
}

impl Completion {
    /// A plain-text answer.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            invocations: Vec::new(),
        }
    }

    /// An answer requesting invocations.
    pub fn invocations(invocations: Vec<CapabilityInvocation>) -> Self {
        Self {
            content: String::new(),
            invocations,
        }
    }

    pub fn wants_capabilities(&self) -> bool {
        !self.invocations.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
