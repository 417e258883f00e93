//! Integration tests for the piped-process transport.
//!
//! These tests spawn the mock-tool-server binary and drive it through the
//! connection manager.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use toolwire_link::transport::DEFAULT_CREDENTIAL_ENV;
use toolwire_link::{
    ConnectOptions, ConnectionEvent, ConnectionManager, ConnectionState, Message, RequestId,
    TransportKind, WireError,
};

const EVENT_WAIT: Duration = Duration::from_secs(10);

fn mock_server_command(flags: &str) -> String {
    format!("{} {}", env!("CARGO_BIN_EXE_mock-tool-server"), flags)
}

async fn connect(flags: &str) -> ConnectionManager {
    let manager = ConnectionManager::new();
    manager
        .connect(ConnectOptions::process(mock_server_command(flags)))
        .await
        .expect("failed to connect to mock server");
    manager
}

/// Wait until an event matching `pred` arrives, returning it.
async fn wait_for<F>(events: &mut broadcast::Receiver<ConnectionEvent>, pred: F) -> ConnectionEvent
where
    F: Fn(&ConnectionEvent) -> bool,
{
    tokio::time::timeout(EVENT_WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event channel failed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_prompt_round_trip() {
    let manager = connect("").await;
    assert!(manager.is_connected());
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.transport_kind(), Some(TransportKind::Process));
    assert_eq!(manager.session_id(), None);

    let answer = manager.execute_prompt("hello", json!({})).await.unwrap();
    assert_eq!(answer, "echo: hello");

    let wrapped = manager
        .execute_prompt("wrapped", json!({ "wrap": true }))
        .await
        .unwrap();
    assert_eq!(wrapped, "echo: wrapped");

    assert_eq!(manager.pending_requests(), 0);
    manager.disconnect().await;
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn test_chunked_output_with_stderr_noise() {
    let manager = Arc::new(connect("--chunked --stderr-noise").await);
    let mut events = manager.subscribe();

    let mut handles = Vec::new();
    for i in 0..8 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            let prompt = format!("prompt {{{}}} \"quoted\"", i);
            let answer = manager.execute_prompt(&prompt, json!({})).await.unwrap();
            (prompt, answer)
        }));
    }

    for handle in handles {
        let (prompt, answer) = handle.await.unwrap();
        assert_eq!(answer, format!("echo: {}", prompt));
    }

    let event = wait_for(&mut events, |e| matches!(e, ConnectionEvent::Diagnostic(_))).await;
    match event {
        ConnectionEvent::Diagnostic(line) => assert!(line.starts_with("[mock] handling generate")),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(manager.pending_requests(), 0);
}

#[tokio::test]
async fn test_server_error_rejects_request() {
    let manager = connect("").await;

    match manager.request("fail", Some(json!({}))).await {
        Err(WireError::Request { code, message, data }) => {
            assert_eq!(code, Some(-32000));
            assert_eq!(message, "tool failed");
            assert_eq!(data, Some(json!({ "method": "fail" })));
        }
        other => panic!("expected request error, got {:?}", other),
    }

    match manager.request("no/such/method", None).await {
        Err(err) => {
            assert!(err.is_request_error());
            assert!(err.to_string().contains("Method not found"));
        }
        Ok(value) => panic!("expected error, got {}", value),
    }

    // The connection survives server-reported errors.
    assert!(manager.is_connected());
    assert_eq!(manager.execute_prompt("still here", json!({})).await.unwrap(), "echo: still here");
}

#[tokio::test]
async fn test_credential_injected_into_environment() {
    let manager = ConnectionManager::new();
    manager
        .connect(ConnectOptions::process(mock_server_command("")).with_credential("sekret"))
        .await
        .unwrap();

    let value = manager
        .request("env", Some(json!({ "name": DEFAULT_CREDENTIAL_ENV })))
        .await
        .unwrap();
    assert_eq!(value, json!("sekret"));

    manager.disconnect().await;

    manager
        .connect(
            ConnectOptions::process(mock_server_command(""))
                .with_credential("other")
                .with_credential_env("MOCK_SERVER_TOKEN"),
        )
        .await
        .unwrap();
    let value = manager
        .request("env", Some(json!({ "name": "MOCK_SERVER_TOKEN" })))
        .await
        .unwrap();
    assert_eq!(value, json!("other"));
}

#[tokio::test]
async fn test_stray_messages_become_events() {
    let manager = connect("").await;
    let mut events = manager.subscribe();

    let result = manager.request("stray", None).await.unwrap();
    assert_eq!(result, json!("done"));

    let unmatched = wait_for(&mut events, |e| matches!(e, ConnectionEvent::Unmatched { .. })).await;
    assert_eq!(
        unmatched,
        ConnectionEvent::Unmatched {
            id: RequestId::Number(424242)
        }
    );

    let server = wait_for(&mut events, |e| matches!(e, ConnectionEvent::ServerMessage(_))).await;
    assert_eq!(
        server,
        ConnectionEvent::ServerMessage(Message::notification(
            "progress",
            Some(json!({ "percent": 50 }))
        ))
    );

    let protocol = wait_for(&mut events, |e| matches!(e, ConnectionEvent::ProtocolError(_))).await;
    assert!(matches!(protocol, ConnectionEvent::ProtocolError(_)));
}

#[tokio::test]
async fn test_invalid_utf8_output_is_a_protocol_error() {
    let manager = connect("").await;
    let mut events = manager.subscribe();

    let result = manager.request("binary", None).await.unwrap();
    assert_eq!(result, json!("clean"));

    let protocol = wait_for(&mut events, |e| matches!(e, ConnectionEvent::ProtocolError(_))).await;
    match protocol {
        ConnectionEvent::ProtocolError(error) => assert!(error.contains("UTF-8"), "{}", error),
        other => panic!("unexpected event {:?}", other),
    }

    // The corrupted notification must not reach subscribers in repaired form.
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ConnectionEvent::ServerMessage(_)),
            "unexpected {:?}",
            event
        );
    }
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_process_exit_abandons_pending_requests() {
    let manager = Arc::new(connect("").await);
    let mut events = manager.subscribe();

    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.request("exit", None).await })
    };

    let event = wait_for(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    match event {
        ConnectionEvent::Disconnected { reason } => assert!(reason.is_some()),
        other => panic!("unexpected event {:?}", other),
    }

    assert!(!manager.is_connected());
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(manager.pending_requests(), 0);

    // Abandoned, not rejected.
    let outcome = tokio::time::timeout(Duration::from_millis(300), waiter).await;
    assert!(outcome.is_err(), "abandoned request should not settle");

    assert!(matches!(
        manager.execute_prompt("anyone?", json!({})).await,
        Err(WireError::NotConnected)
    ));
}

#[tokio::test]
async fn test_immediate_exit_is_noticed() {
    let manager = ConnectionManager::new();
    let mut events = manager.subscribe();

    manager
        .connect(ConnectOptions::process(mock_server_command("--exit-after 0")))
        .await
        .unwrap();

    wait_for(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(!manager.is_connected());
    assert!(matches!(
        manager.request("generate", None).await,
        Err(WireError::NotConnected)
    ));
}

#[tokio::test]
async fn test_exit_after_marks_disconnected() {
    let manager = connect("--exit-after 1").await;
    let mut events = manager.subscribe();

    assert_eq!(manager.execute_prompt("last", json!({})).await.unwrap(), "echo: last");
    wait_for(&mut events, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn test_request_timeout_removes_entry() {
    let manager = connect("").await;

    let request = manager.new_request("silent", None).unwrap();
    let result = manager
        .send_request_with_timeout(request, Duration::from_millis(100))
        .await;
    assert!(matches!(result, Err(WireError::Timeout)));
    assert_eq!(manager.pending_requests(), 0);

    // Default deadline from the connect options.
    manager.disconnect().await;
    manager
        .connect(
            ConnectOptions::process(mock_server_command(""))
                .with_request_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap();
    assert!(matches!(
        manager.request("silent", None).await,
        Err(WireError::Timeout)
    ));
}

#[tokio::test]
async fn test_disconnect_abandons_and_kills() {
    let manager = Arc::new(connect("").await);

    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.request("silent", None).await })
    };

    tokio::time::timeout(EVENT_WAIT, async {
        while manager.pending_requests() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    manager.disconnect().await;
    assert!(!manager.is_connected());
    assert_eq!(manager.pending_requests(), 0);

    let outcome = tokio::time::timeout(Duration::from_millis(300), waiter).await;
    assert!(outcome.is_err(), "abandoned request should not settle");
}

#[tokio::test]
async fn test_connect_is_idempotent_for_same_options() {
    let options = ConnectOptions::process(mock_server_command(""));
    let manager = ConnectionManager::new();
    manager.connect(options.clone()).await.unwrap();
    manager.connect(options).await.unwrap();

    let other = ConnectOptions::process(mock_server_command("--chunked"));
    assert!(matches!(
        manager.connect(other).await,
        Err(WireError::AlreadyConnected(_))
    ));

    assert_eq!(manager.execute_prompt("one", json!({})).await.unwrap(), "echo: one");
}

#[tokio::test]
async fn test_ids_unique_across_requests() {
    let manager = connect("").await;
    let first = manager.new_request("generate", None).unwrap();
    let second = manager.new_request("generate", None).unwrap();
    assert_ne!(first.id(), second.id());
}
