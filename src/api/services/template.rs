//! `{{path}}` expansion.

use super::expression::{self, ExpressionError, Scope, stringify};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("variable '{0}' is not defined")]
    Missing(String),
    #[error("invalid placeholder '{placeholder}': {source}")]
    Invalid {
        placeholder: String,
        #[source]
        source: ExpressionError,
    },
}

/// Placeholders in `input`, trimmed, in order of appearance.
pub fn placeholders(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = input;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            break;
        };
        out.push(after[..close].trim().to_string());
        rest = &after[close + 2..];
    }
    out
}

pub fn has_placeholders(input: &str) -> bool {
    !placeholders(input).is_empty()
}

/// Replace every `{{...}}` with its value in `scope`.
///
/// An unterminated `{{` is kept verbatim. A placeholder that evaluates to `null` or
/// names an undefined variable is an error.
pub fn expand(input: &str, scope: &dyn Scope) -> Result<String, TemplateError> {
    if !input.contains("{{") {
        return Ok(input.to_string());
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            break;
        };
        out.push_str(&rest[..open]);
        let placeholder = after[..close].trim();
        let value = expression::evaluate(placeholder, scope).map_err(|e| match e {
            ExpressionError::UnknownVariable(_) => TemplateError::Missing(placeholder.to_string()),
            other => TemplateError::Invalid {
                placeholder: placeholder.to_string(),
                source: other,
            },
        })?;
        if value == Value::Null {
            return Err(TemplateError::Missing(placeholder.to_string()));
        }
        out.push_str(&stringify(&value));
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}
