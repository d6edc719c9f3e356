//! Custom assertion helpers for common test patterns.
//!
//! Provides functions for checking JSON-RPC traffic with readable failure
//! messages.

use serde_json::Value;
use std::collections::HashSet;

/// Assert that `message` is a JSON-RPC request for `method` and return its id.
///
/// # Example
///
/// ```rust
/// use toolwire_test_utils::assertions::assert_request;
/// use serde_json::json;
///
/// let id = assert_request(
///     &json!({"jsonrpc": "2.0", "id": 4, "method": "tools/list"}),
///     "tools/list",
/// );
/// assert_eq!(id, 4);
/// ```
pub fn assert_request(message: &Value, method: &str) -> u64 {
    assert_eq!(
        message["jsonrpc"], "2.0",
        "Not a JSON-RPC 2.0 message: {message}"
    );
    assert_eq!(
        message["method"], method,
        "Expected a {method} request, got: {message}"
    );
    message["id"]
        .as_u64()
        .unwrap_or_else(|| panic!("Request has no numeric id: {message}"))
}

/// Assert that `message` is a JSON-RPC notification for `method`.
pub fn assert_notification(message: &Value, method: &str) {
    assert_eq!(
        message["jsonrpc"], "2.0",
        "Not a JSON-RPC 2.0 message: {message}"
    );
    assert_eq!(
        message["method"], method,
        "Expected a {method} notification, got: {message}"
    );
    assert!(
        message.get("id").is_none(),
        "Notification must not carry an id: {message}"
    );
}

/// Assert that every request in `messages` has a distinct id.
pub fn assert_unique_ids(messages: &[Value]) {
    let mut seen = HashSet::new();
    for message in messages {
        if let Some(id) = message.get("id").and_then(Value::as_u64) {
            assert!(seen.insert(id), "Request id {id} was reused: {message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assert_notification() {
        assert_notification(
            &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            "notifications/initialized",
        );
    }

    #[test]
    #[should_panic(expected = "must not carry an id")]
    fn test_assert_notification_rejects_id() {
        assert_notification(
            &json!({"jsonrpc": "2.0", "id": 1, "method": "notifications/initialized"}),
            "notifications/initialized",
        );
    }

    #[test]
    #[should_panic(expected = "was reused")]
    fn test_assert_unique_ids() {
        assert_unique_ids(&[json!({"id": 1}), json!({"id": 2}), json!({"id": 1})]);
    }
}
