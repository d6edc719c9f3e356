//! Client integration tests.
//!
//! Drive an `McpClient` against a scripted in-memory worker.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use toolwire_mcp::{ClientOptions, ClientState, McpClient, McpError, ToolOutput};
use toolwire_test_utils::assertions::{assert_notification, assert_request, assert_unique_ids};
use toolwire_test_utils::fixtures::{initialize_result, json_text_result, text_result};
use toolwire_test_utils::MockTransport;

fn client_for(transport: &MockTransport) -> Arc<McpClient> {
    Arc::new(McpClient::new(
        "job-analysis",
        Arc::new(transport.clone()),
        ClientOptions::default(),
    ))
}

async fn started(transport: &MockTransport) -> Arc<McpClient> {
    let client = client_for(transport);
    client.start().await.expect("handshake should succeed");
    client
}

/// Poll until `predicate` holds for the recorded writes.
async fn wait_for_write<F>(transport: &MockTransport, predicate: F) -> Value
where
    F: Fn(&Value) -> bool,
{
    let wait = async {
        loop {
            if let Some(found) = transport.writes().into_iter().find(|w| predicate(w)) {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("expected write never happened")
}

#[tokio::test]
async fn test_handshake_sequence() {
    let transport = MockTransport::new()
        .with_handshake()
        .with_tool("validate_dependencies", "Validate package versions")
        .with_tool("suggest_upgrades", "Suggest newer versions");
    let client = started(&transport).await;

    assert_eq!(client.state().await, ClientState::Initialized);

    let writes = transport.writes();
    assert_eq!(writes.len(), 3);
    let init_id = assert_request(&writes[0], "initialize");
    assert_eq!(writes[0]["params"]["protocolVersion"], "2024-11-05");
    assert_eq!(writes[0]["params"]["clientInfo"]["name"], "toolwire");
    assert_notification(&writes[1], "notifications/initialized");
    let list_id = assert_request(&writes[2], "tools/list");
    assert!(list_id > init_id);

    let names: Vec<String> = client.tools().await.into_iter().map(|t| t.name).collect();
    assert_eq!(names, ["validate_dependencies", "suggest_upgrades"]);
    assert!(client.has_tool("suggest_upgrades").await);
    assert!(!client.has_tool("deploy").await);

    let info = client.server_info().await.expect("server info");
    assert_eq!(info.server_info.name, "mock-worker");
}

#[tokio::test]
async fn test_start_twice_is_noop() {
    let transport = MockTransport::new().with_handshake();
    let client = started(&transport).await;

    client.start().await.unwrap();
    assert_eq!(transport.start_count(), 1);
    assert_eq!(transport.requests("initialize").len(), 1);
}

#[tokio::test]
async fn test_validate_dependencies_structured_output() {
    let payload = json!({"validated": {"react": "18.2.0"}, "errors": []});
    let transport = MockTransport::new()
        .with_handshake()
        .with_tool("validate_dependencies", "Validate package versions")
        .with_tool_result("validate_dependencies", json_text_result(&payload));
    let client = started(&transport).await;

    let output = client
        .call_tool(
            "validate_dependencies",
            json!({"dependencies": {"react": "^18.0.0"}}),
        )
        .await
        .unwrap();

    assert_eq!(output, ToolOutput::Structured(payload));

    let call = &transport.requests("tools/call")[0];
    assert_eq!(call["params"]["name"], "validate_dependencies");
    assert_eq!(call["params"]["arguments"]["dependencies"]["react"], "^18.0.0");
    assert_eq!(client.pending_count().await, 0);
}

#[tokio::test]
async fn test_plain_text_output() {
    let transport = MockTransport::new()
        .with_handshake()
        .with_tool_result("summarize", text_result("all good"));
    let client = started(&transport).await;

    let output = client.call_tool("summarize", json!({})).await.unwrap();
    assert_eq!(output, ToolOutput::PlainText("all good".to_string()));
}

#[tokio::test]
async fn test_tool_error_is_tool_invocation() {
    let transport = MockTransport::new()
        .with_handshake()
        .with_tool_error("validate_dependencies", -32000, "boom");
    let client = started(&transport).await;

    let err = client
        .call_tool("validate_dependencies", json!({}))
        .await
        .unwrap_err();

    match &err {
        McpError::ToolInvocation { code, message } => {
            assert_eq!(*code, -32000);
            assert_eq!(message, "boom");
        }
        other => panic!("expected ToolInvocation, got {other:?}"),
    }
    assert_eq!(err.to_string(), "boom");
    assert_eq!(client.state().await, ClientState::Initialized);
}

#[tokio::test]
async fn test_concurrent_calls_answered_out_of_order() {
    let transport = MockTransport::new().with_handshake();
    let client = started(&transport).await;

    let mut handles = Vec::new();
    for i in 0..5u64 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client.call_tool("score", json!({"index": i})).await
        }));
    }

    let calls = transport.wait_for_requests("tools/call", 5).await;
    assert_unique_ids(&transport.writes());
    assert_eq!(client.pending_count().await, 5);

    for call in calls.iter().rev() {
        let id = call["id"].as_u64().unwrap();
        let index = &call["params"]["arguments"]["index"];
        transport.respond(id, json_text_result(&json!({"index": index})));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let output = handle.await.unwrap().unwrap();
        assert_eq!(output, ToolOutput::Structured(json!({"index": i})));
    }
    assert_eq!(client.pending_count().await, 0);
}

#[tokio::test]
async fn test_stop_rejects_pending_requests() {
    let transport = MockTransport::new().with_handshake();
    let client = started(&transport).await;

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.call_tool("slow", json!({})).await })
    };
    transport.wait_for_requests("tools/call", 1).await;

    client.stop().await.unwrap();

    assert!(matches!(call.await.unwrap(), Err(McpError::TransportClosed)));
    assert_eq!(client.state().await, ClientState::Stopped);
    assert_eq!(client.pending_count().await, 0);
    assert_eq!(transport.close_count(), 1);

    // Idempotent.
    client.stop().await.unwrap();
    assert_eq!(transport.close_count(), 1);
}

#[tokio::test]
async fn test_worker_exit_rejects_pending_requests() {
    let transport = MockTransport::new().with_handshake();
    let client = started(&transport).await;

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.call_tool("slow", json!({})).await })
    };
    transport.wait_for_requests("tools/call", 1).await;

    transport.close_stream(Some("worker exited with exit status: 1"));

    assert!(matches!(call.await.unwrap(), Err(McpError::TransportClosed)));
    assert_eq!(client.state().await, ClientState::Stopped);
    assert!(matches!(
        client.call_tool("score", json!({})).await,
        Err(McpError::TransportClosed)
    ));
}

#[tokio::test]
async fn test_request_timeout_removes_entry() {
    let transport = MockTransport::new().with_handshake();
    let client = McpClient::new(
        "monitoring",
        Arc::new(transport.clone()),
        ClientOptions::default().with_request_timeout(Duration::from_millis(50)),
    );
    client.start().await.unwrap();

    let err = client.call_tool("slow", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::Timeout(d) if d == Duration::from_millis(50)));
    assert_eq!(client.pending_count().await, 0);

    // A late answer is dropped without disturbing the client.
    let id = transport.requests("tools/call")[0]["id"].as_u64().unwrap();
    transport.respond(id, text_result("late"));
    assert_eq!(client.state().await, ClientState::Initialized);
}

#[tokio::test]
async fn test_write_failure_clears_entry() {
    let transport = MockTransport::new().with_handshake();
    let client = started(&transport).await;

    transport.fail_writes();
    let err = client.call_tool("score", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::Write(_)));
    assert_eq!(client.pending_count().await, 0);
}

#[tokio::test]
async fn test_notifications_are_broadcast() {
    let transport = MockTransport::new().with_handshake();
    let client = started(&transport).await;
    let mut notifications = client.subscribe();

    transport.push(json!({
        "jsonrpc": "2.0",
        "method": "notifications/tools/list_changed"
    }));

    let notification = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("notification not delivered")
        .unwrap();
    assert_eq!(notification.server, "job-analysis");
    assert_eq!(notification.method, "notifications/tools/list_changed");
    assert!(notification.params.is_none());
}

#[tokio::test]
async fn test_worker_request_gets_method_not_found() {
    let transport = MockTransport::new().with_handshake();
    let _client = started(&transport).await;

    transport.push(json!({
        "jsonrpc": "2.0",
        "id": "srv-1",
        "method": "sampling/createMessage",
        "params": {}
    }));

    let reply = wait_for_write(&transport, |w| w["id"] == "srv-1").await;
    assert_eq!(reply["error"]["code"], -32601);
    assert_eq!(
        reply["error"]["message"],
        "Method not found: sampling/createMessage"
    );
}

#[tokio::test]
async fn test_stray_messages_do_not_disturb_calls() {
    let transport = MockTransport::new()
        .with_handshake()
        .with_tool_result("ping", text_result("pong"));
    let client = started(&transport).await;

    transport.respond(999, json!({"ignored": true}));
    transport.push(json!({"jsonrpc": "2.0"}));
    transport.diagnostic("WARNING: cache directory missing");
    transport.diagnostic("Traceback (most recent call last):");

    let output = client.call_tool("ping", json!({})).await.unwrap();
    assert_eq!(output, ToolOutput::PlainText("pong".to_string()));
    assert_eq!(client.state().await, ClientState::Initialized);
}

#[tokio::test]
async fn test_refresh_tools_replaces_cache() {
    let transport = MockTransport::new()
        .with_handshake()
        .with_tool("first", "First tool");
    let client = started(&transport).await;
    assert!(client.has_tool("first").await);
    assert!(!client.has_tool("second").await);

    transport.add_tool("second", "Second tool");
    let tools = client.refresh_tools().await.unwrap();

    assert_eq!(tools.len(), 2);
    assert!(client.has_tool("second").await);
    assert_eq!(transport.requests("tools/list").len(), 2);
}

#[tokio::test]
async fn test_initialize_error_fails_start() {
    let transport = MockTransport::new().with_initialize_error(-32603, "database unavailable");
    let client = client_for(&transport);

    let err = client.start().await.unwrap_err();
    match err {
        McpError::InitializationFailed(message) => {
            assert!(message.contains("database unavailable"), "{message}")
        }
        other => panic!("expected InitializationFailed, got {other:?}"),
    }
    assert_eq!(client.state().await, ClientState::Stopped);
    assert_eq!(transport.close_count(), 1);
    assert!(transport.requests("tools/list").is_empty());
}

#[tokio::test]
async fn test_spawn_error_fails_start() {
    let transport = MockTransport::new().with_start_error("python3: No such file or directory");
    let client = client_for(&transport);

    assert!(matches!(client.start().await, Err(McpError::Spawn(_))));
    assert_eq!(client.state().await, ClientState::Stopped);
    assert_eq!(transport.write_count(), 0);
}

#[tokio::test]
async fn test_call_before_start_is_not_initialized() {
    let transport = MockTransport::new().with_handshake();
    let client = client_for(&transport);

    let err = client.call_tool("score", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::NotInitialized(name) if name == "job-analysis"));
    assert_eq!(transport.write_count(), 0);
}

#[tokio::test]
async fn test_call_during_handshake_is_not_initialized() {
    // No scripted handshake: the initialize request stays unanswered.
    let transport = MockTransport::new();
    let client = client_for(&transport);

    let starting = tokio::spawn({
        let client = client.clone();
        async move { client.start().await }
    });
    let init = transport.wait_for_requests("initialize", 1).await;
    assert_eq!(client.state().await, ClientState::Starting);

    let err = client
        .call_tool("validate_dependencies", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::NotInitialized(name) if name == "job-analysis"));
    assert!(transport.requests("tools/call").is_empty());

    let init_id = assert_request(&init[0], "initialize");
    transport.respond(init_id, initialize_result("late-worker"));
    let list = transport.wait_for_requests("tools/list", 1).await;
    transport.respond(assert_request(&list[0], "tools/list"), json!({"tools": []}));

    starting.await.unwrap().unwrap();
    assert_eq!(client.state().await, ClientState::Initialized);
    assert!(transport.requests("tools/call").is_empty());
}
