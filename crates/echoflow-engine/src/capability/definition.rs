//! Capability definitions and their function-calling schema export.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

// ---------------------------------------------------------------------------
// Parameter types
// ---------------------------------------------------------------------------

/// The JSON type a capability parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// The JSON Schema `type` keyword for this parameter type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Whether `value` has this JSON type.
    ///
    /// Integers are numbers without a fractional part as stored by
    /// `serde_json` (`i64`/`u64`); any number satisfies [`ParamType::Number`].
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Number)
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Parameter spec
// ---------------------------------------------------------------------------

/// Declaration of a single capability parameter.
///
/// Built with [`ParameterSpec::new`] and the chained setters:
///
/// ```rust
/// # use echoflow_engine::capability::{ParamType, ParameterSpec};
/// let limit = ParameterSpec::new("limit", ParamType::Integer, "How many events to return")
///     .min(1.0)
///     .max(50.0)
///     .default_value(serde_json::json!(10));
/// assert!(!limit.required);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    /// Regular expression a string value must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// JSON Schema for array items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
}

impl ParameterSpec {
    /// An optional parameter with no constraints.
    pub fn new(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: false,
            default: None,
            allowed: None,
            pattern: None,
            min: None,
            max: None,
            items: None,
        }
    }

    /// Mark the parameter as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Restrict the parameter to a fixed set of values.
    #[must_use]
    pub fn one_of(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.allowed = Some(values.into_iter().collect());
        self
    }

    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    #[must_use]
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    #[must_use]
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    #[must_use]
    pub fn items(mut self, schema: Value) -> Self {
        self.items = Some(schema);
        self
    }

    /// JSON Schema fragment describing this parameter.
    ///
    /// `pattern` is only emitted for strings and `items` only for arrays;
    /// numeric bounds are emitted as `minimum`/`maximum`.
    pub fn to_json_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.param_type.as_str()));
        schema.insert("description".into(), json!(self.description));

        if let Some(allowed) = &self.allowed {
            schema.insert("enum".into(), Value::Array(allowed.clone()));
        }
        if let Some(pattern) = &self.pattern
            && self.param_type == ParamType::String
        {
            schema.insert("pattern".into(), json!(pattern));
        }
        if self.param_type.is_numeric() {
            if let Some(min) = self.min {
                schema.insert("minimum".into(), json!(min));
            }
            if let Some(max) = self.max {
                schema.insert("maximum".into(), json!(max));
            }
        }
        if let Some(items) = &self.items
            && self.param_type == ParamType::Array
        {
            schema.insert("items".into(), items.clone());
        }
        if let Some(default) = &self.default {
            schema.insert("default".into(), default.clone());
        }

        Value::Object(schema)
    }
}

// ---------------------------------------------------------------------------
// Capability definition
// ---------------------------------------------------------------------------

/// Name, description and ordered parameter list of a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    /// Unique capability name; the language model refers to it by this.
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl CapabilityDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter, keeping declaration order.
    #[must_use]
    pub fn param(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    /// Look up a declared parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// The `parameters` object of the function-calling schema:
    /// `{type: "object", properties: {...}, required: [...]}`.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            properties.insert(param.name.clone(), param.to_json_schema());
            if param.required {
                required.push(json!(param.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// The full function-calling schema:
    /// `{name, description, parameters: {...}}`.
    pub fn to_function_schema(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters_schema(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
