//! Upstream outcome as seen by the relay, and answer extraction from the JSON body.

use crate::relay::error::RelayError;
use serde_json::Value;

/// Answer fields in priority order.
pub const ANSWER_FIELDS: [&str; 3] = ["response", "answer", "message"];

/// Why no HTTP response came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Connection,
    Other,
}

/// Result of one POST: either a status and body, or a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayResponse {
    Success { status: u16, body: String },
    TransportFailure { kind: FailureKind, detail: String },
}

/// Empty or zero-like values count as absent so the next field is tried.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Pick the answer from a 200 body: first present of `response`, `answer`, `message`.
pub fn extract_answer(body: &str) -> Result<String, RelayError> {
    let data: Value = serde_json::from_str(body)
        .map_err(|e| RelayError::Unexpected(format!("invalid JSON in response: {}", e)))?;
    let obj = data
        .as_object()
        .ok_or_else(|| RelayError::Unexpected("response body is not a JSON object".to_string()))?;
    let found = ANSWER_FIELDS
        .iter()
        .find_map(|field| obj.get(*field).filter(|v| is_present(v)).map(|v| (*field, v)));
    match found {
        Some((_, Value::String(s))) => Ok(s.clone()),
        Some((field, _)) => Err(RelayError::Unexpected(format!(
            "field `{}` in response is not a string",
            field
        ))),
        None => Err(RelayError::Unexpected(format!(
            "response has none of the fields {}",
            ANSWER_FIELDS.join(", ")
        ))),
    }
}
