// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

// Integration tests
//
// End-to-end through the public API:
// config YAML -> ChatClient -> ReqwestTransport -> backend -> processor -> sink
//
// Uses wiremock as the chat backend and a plain Vec sink.

use chatflow_stream::client::ChatClient;
use chatflow_stream::config::{self, Config, StringSource};
use chatflow_stream::stream::{ChatEvent, StreamFailure, StreamOutcome};
use chatflow_stream::transport::ChatRequest;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Infrastructure
// ---------------------------------------------------------------------------

fn test_config(base_url: &str, timeout_ms: u64) -> Config {
    let yaml = format!(
        r#"chatflow: v1
backend:
  base_url: "{base_url}/v1"
  api_key: "app-test-key"
  timeout_ms: {timeout_ms}
stream:
  max_buffer_bytes: 65536
"#
    );
    config::load_config(&StringSource::new(yaml)).expect("test config should parse")
}

fn sse_body(records: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for record in records {
        body.push_str("data: ");
        body.push_str(&record.to_string());
        body.push_str("\n\n");
    }
    body
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

async fn ask(config: &Config, query: &str) -> (StreamOutcome, Vec<ChatEvent>) {
    let client = ChatClient::from_config(config);
    let mut events = Vec::new();
    let outcome = client
        .send(
            &ChatRequest::new(query, "it-user"),
            &mut events,
            &CancellationToken::new(),
        )
        .await;
    (outcome, events)
}

fn answer(events: &[ChatEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::Content(d) => Some(d.text.as_str()),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streamed_chat_answer_delivered() {
    let mock_server = MockServer::start().await;
    let body = sse_body(&[
        serde_json::json!({"event": "message", "task_id": "t1", "conversation_id": "c1", "message_id": "m1", "answer": "劳动"}),
        serde_json::json!({"event": "message", "task_id": "t1", "conversation_id": "c1", "message_id": "m1", "answer": "合同"}),
        serde_json::json!({"event": "message_end", "task_id": "t1", "conversation_id": "c1", "message_id": "m1", "metadata": {"usage": {"total_tokens": 12}}}),
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .and(header("authorization", "Bearer app-test-key"))
        .and(body_partial_json(serde_json::json!({
            "query": "什么是劳动合同",
            "response_mode": "streaming",
            "user": "it-user"
        })))
        .respond_with(sse_response(body))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), 5_000);
    let (outcome, events) = ask(&config, "什么是劳动合同").await;

    assert_eq!(outcome, StreamOutcome::Completed);
    assert_eq!(answer(&events), "劳动合同");
    match &events[0] {
        ChatEvent::Content(delta) => {
            assert!(delta.is_first);
            assert_eq!(delta.meta.conversation_id.as_deref(), Some("c1"));
        }
        other => panic!("expected content first, got {other:?}"),
    }
    assert!(matches!(events[2], ChatEvent::MessageEnd(_)));
    assert_eq!(events.last(), Some(&ChatEvent::Completed { has_error: false }));
}

#[tokio::test]
async fn workflow_answer_reconciled_end_to_end() {
    let mock_server = MockServer::start().await;
    let body = sse_body(&[
        serde_json::json!({"event": "workflow_started", "task_id": "t2", "workflow_run_id": "run-1", "data": {"id": "run-1"}}),
        serde_json::json!({"event": "message", "task_id": "t2", "answer": "stale token"}),
        serde_json::json!({"event": "node_finished", "task_id": "t2", "workflow_run_id": "run-1", "data": {"node_id": "llm", "status": "succeeded"}}),
        serde_json::json!({"event": "workflow_finished", "task_id": "t2", "workflow_run_id": "run-1", "data": {"status": "succeeded", "outputs": {"answer": "劳动合同"}}}),
        serde_json::json!({"event": "workflow_finished", "task_id": "t2", "workflow_run_id": "run-1", "data": {"status": "succeeded", "outputs": {"answer": "劳动合同的基本要素"}}}),
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .respond_with(sse_response(body))
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), 5_000);
    let (outcome, events) = ask(&config, "q").await;

    assert_eq!(outcome, StreamOutcome::Completed);
    assert_eq!(answer(&events), "劳动合同的基本要素");
}

#[tokio::test]
async fn in_stream_error_terminates() {
    let mock_server = MockServer::start().await;
    let mut body = sse_body(&[
        serde_json::json!({"event": "message", "task_id": "t3", "answer": "部分"}),
        serde_json::json!({"event": "error", "status": 400, "code": "provider_quota_exceeded", "message": "quota exceeded"}),
    ]);
    body.push_str("data: {\"event\":\"message\",\"answer\":\"never\"}\n\n");

    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .respond_with(sse_response(body))
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), 5_000);
    let (outcome, events) = ask(&config, "q").await;

    assert!(matches!(outcome, StreamOutcome::Failed(StreamFailure::Protocol(_))));
    assert_eq!(answer(&events), "部分");
    assert_eq!(
        events[1..],
        [
            ChatEvent::Error {
                message: "quota exceeded".to_string(),
                code: Some("provider_quota_exceeded".to_string()),
            },
            ChatEvent::Completed { has_error: true },
        ]
    );
}

#[tokio::test]
async fn non_success_status_reports_body_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "code": "invalid_param",
            "message": "Conversation Not Exists.",
            "status": 400
        })))
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), 5_000);
    let (outcome, events) = ask(&config, "q").await;

    assert_eq!(outcome, StreamOutcome::Failed(StreamFailure::Status(400)));
    assert_eq!(
        events,
        vec![
            ChatEvent::Error {
                message: "Conversation Not Exists.".to_string(),
                code: Some("invalid_param".to_string()),
            },
            ChatEvent::Completed { has_error: true },
        ]
    );
}

#[tokio::test]
async fn slow_backend_times_out() {
    let mock_server = MockServer::start().await;

    // Delay longer than timeout_ms (500ms in config)
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .respond_with(
            sse_response(sse_body(&[serde_json::json!({"event": "message", "answer": "late"})]))
                .set_delay(std::time::Duration::from_millis(3000)),
        )
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), 500);
    let (outcome, events) = ask(&config, "q").await;

    assert_eq!(outcome, StreamOutcome::Failed(StreamFailure::Timeout));
    assert_eq!(
        events,
        vec![
            ChatEvent::Error {
                message: "request timed out".to_string(),
                code: Some("timeout".to_string()),
            },
            ChatEvent::Completed { has_error: true },
        ]
    );
}

#[tokio::test]
async fn stop_responding_hits_stop_endpoint() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages/t9/stop"))
        .and(header("authorization", "Bearer app-test-key"))
        .and(body_partial_json(serde_json::json!({"user": "it-user"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": "success"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri(), 5_000);
    let client = ChatClient::from_config(&config);
    client
        .stop_responding("t9", "it-user")
        .await
        .expect("stop should succeed");
}
