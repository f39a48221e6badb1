//! Argument validation against a [`CapabilityDefinition`].
//!
//! Validation stops at the first violation so the failed result can name it
//! precisely.  Arguments the definition does not declare are passed through
//! untouched.

use regex::Regex;
use serde_json::Value;

use super::definition::{CapabilityDefinition, ParameterSpec};
use super::{Arguments, CapabilityError};

/// Validate `args` and fill in declared defaults for absent optional
/// parameters.
///
/// Checks, in declaration order: presence of every required parameter, then
/// for every supplied declared parameter its type, `enum` membership,
/// numeric `min`/`max` and string `pattern`.
///
/// # Errors
///
/// Returns [`CapabilityError::Validation`] describing the first violation.
pub fn validate_arguments(
    def: &CapabilityDefinition,
    mut args: Arguments,
) -> Result<Arguments, CapabilityError> {
    for param in &def.parameters {
        if param.required && !args.contains_key(&param.name) {
            return Err(violation(
                def,
                format!("missing required parameter `{}`", param.name),
            ));
        }
    }

    for param in &def.parameters {
        if let Some(value) = args.get(&param.name) {
            check_value(def, param, value)?;
        }
    }

    for param in &def.parameters {
        if let Some(default) = &param.default
            && !args.contains_key(&param.name)
        {
            args.insert(param.name.clone(), default.clone());
        }
    }

    Ok(args)
}

fn check_value(
    def: &CapabilityDefinition,
    param: &ParameterSpec,
    value: &Value,
) -> Result<(), CapabilityError> {
    if !param.param_type.matches(value) {
        return Err(violation(
            def,
            format!("parameter `{}` must be of type {}", param.name, param.param_type),
        ));
    }

    if let Some(allowed) = &param.allowed
        && !allowed.contains(value)
    {
        return Err(violation(
            def,
            format!(
                "parameter `{}` must be one of {}",
                param.name,
                Value::Array(allowed.clone())
            ),
        ));
    }

    if let Some(number) = value.as_f64() {
        if let Some(min) = param.min
            && number < min
        {
            return Err(violation(
                def,
                format!("parameter `{}` is below the minimum {min}", param.name),
            ));
        }
        if let Some(max) = param.max
            && number > max
        {
            return Err(violation(
                def,
                format!("parameter `{}` is above the maximum {max}", param.name),
            ));
        }
    }

    if let (Some(pattern), Some(text)) = (&param.pattern, value.as_str()) {
        let re = Regex::new(pattern).map_err(|e| {
            violation(
                def,
                format!("parameter `{}` declares an invalid pattern: {e}", param.name),
            )
        })?;
        if !re.is_match(text) {
            return Err(violation(
                def,
                format!("parameter `{}` does not match pattern `{pattern}`", param.name),
            ));
        }
    }

    Ok(())
}

fn violation(def: &CapabilityDefinition, reason: String) -> CapabilityError {
    CapabilityError::Validation {
        capability: def.name.clone(),
        reason,
    }
}
