// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Best-effort decoding of the backend's `{ success, data, error }` envelope.

use serde_json::Value;

/// A response body, either wrapped in the envelope or passed through raw.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Wrapped { success: bool, data: Value, error: Option<String> },
    Raw(Value),
}

impl Envelope {
    /// Decode a body. Anything that is not an object with a boolean
    /// `success` is kept as-is; non-JSON text becomes a JSON string.
    pub fn parse(body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => Self::from_value(value),
            Err(_) if body.is_empty() => Self::Raw(Value::Null),
            Err(_) => Self::Raw(Value::String(body.to_owned())),
        }
    }

    pub fn from_value(value: Value) -> Self {
        let Some(success) = value.get("success").and_then(Value::as_bool) else {
            return Self::Raw(value);
        };
        let error = value
            .get("error")
            .or_else(|| value.get("message"))
            .and_then(error_text);
        let data = match value {
            Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        Self::Wrapped { success, data, error }
    }

    /// The payload: `data` for an envelope, the whole body otherwise.
    pub fn data(&self) -> &Value {
        match self {
            Self::Wrapped { data, .. } => data,
            Self::Raw(value) => value,
        }
    }

    pub fn into_data(self) -> Value {
        match self {
            Self::Wrapped { data, .. } => data,
            Self::Raw(value) => value,
        }
    }

    /// `false` only for an envelope that says so explicitly.
    pub fn is_success(&self) -> bool {
        match self {
            Self::Wrapped { success, .. } => *success,
            Self::Raw(_) => true,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Wrapped { error, .. } => error.as_deref(),
            Self::Raw(_) => None,
        }
    }
}

fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| Some(value.to_string())),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
