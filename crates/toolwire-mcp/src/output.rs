//! Tool result unwrapping.
//!
//! Workers wrap their payload in an MCP content envelope, usually a single
//! text part holding JSON. Callers want the payload itself.

use serde_json::Value;

/// What a tool call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// The first text part parsed as JSON.
    Structured(Value),
    /// The first text part, which was not JSON.
    PlainText(String),
    /// No usable text part; the whole result as received.
    RawEnvelope(Value),
}

impl ToolOutput {
    /// Unwrap a `tools/call` result.
    ///
    /// Looks at the first content part with `type == "text"` and a string
    /// `text`. Anything without such a part is returned untouched.
    pub fn from_result(result: Value) -> Self {
        let text = result
            .get("content")
            .and_then(Value::as_array)
            .and_then(|parts| {
                parts.iter().find_map(|part| {
                    if part.get("type").and_then(Value::as_str) != Some("text") {
                        return None;
                    }
                    part.get("text").and_then(Value::as_str)
                })
            })
            .map(str::to_owned);

        match text {
            Some(text) => match serde_json::from_str(&text) {
                Ok(value) => Self::Structured(value),
                Err(_) => Self::PlainText(text),
            },
            None => Self::RawEnvelope(result),
        }
    }

    /// Collapse into a plain JSON value. Plain text becomes a JSON string.
    pub fn into_value(self) -> Value {
        match self {
            Self::Structured(value) | Self::RawEnvelope(value) => value,
            Self::PlainText(text) => Value::String(text),
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::RawEnvelope(_))
    }
}
