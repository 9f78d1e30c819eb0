// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

// Chat backend transport
//
// Opens the streaming `chat-messages` request and hands back the status
// and the raw body stream. Stopping a running generation goes through the
// same seam so the client can be tested without a network.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::BackendConfig;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    #[default]
    Streaming,
}

/// Body of a `chat-messages` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub query: String,
    /// App-defined variables; always sent, possibly empty.
    pub inputs: Map<String, Value>,
    pub response_mode: ResponseMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub user: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<Value>,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            inputs: Map::new(),
            response_mode: ResponseMode::Streaming,
            conversation_id: None,
            user: user.into(),
            files: Vec::new(),
        }
    }

    /// Continue an existing conversation. An empty id starts a new one.
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        let id = conversation_id.into();
        self.conversation_id = if id.is_empty() { None } else { Some(id) };
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn with_file(mut self, file: Value) -> Self {
        self.files.push(file);
        self
    }
}

// ---------------------------------------------------------------------------
// Response and errors
// ---------------------------------------------------------------------------

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

pub struct TransportResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("backend request failed: {0}")]
    Transport(String),
    #[error("backend request timed out: {0}")]
    Timeout(String),
    #[error("backend responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else {
            TransportError::Transport(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send the request. Any HTTP status is a successful open; the status
    /// is returned alongside the body.
    async fn open(&self, request: &ChatRequest) -> Result<TransportResponse, TransportError>;

    /// Ask the backend to stop generating for `task_id`.
    async fn stop(&self, task_id: &str, user: &str) -> Result<(), TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    backend: BackendConfig,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client, backend: BackendConfig) -> Self {
        Self { client, backend }
    }

    pub fn from_config(backend: &BackendConfig) -> Self {
        Self::new(reqwest::Client::new(), backend.clone())
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.post(url);
        if self.backend.api_key.is_empty() {
            req
        } else {
            req.bearer_auth(&self.backend.api_key)
        }
    }
}

/// `{base_url}{chat_path}/{task_id}/stop`. The task id comes from the
/// backend and is escaped as a single path segment.
pub fn stop_url(backend: &BackendConfig, task_id: &str) -> Result<reqwest::Url, TransportError> {
    let mut url = reqwest::Url::parse(&backend.chat_url())
        .map_err(|e| TransportError::Transport(format!("invalid chat url: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| TransportError::Transport("chat url cannot take a path".to_string()))?
        .pop_if_empty()
        .push(task_id)
        .push("stop");
    Ok(url)
}

#[async_trait]
impl ChatTransport for ReqwestTransport {
    async fn open(&self, request: &ChatRequest) -> Result<TransportResponse, TransportError> {
        let url = self.backend.chat_url();
        tracing::debug!(%url, "opening chat stream");

        let resp = self
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.bytes_stream().map_err(TransportError::from);
        Ok(TransportResponse {
            status,
            body: Box::pin(body),
        })
    }

    async fn stop(&self, task_id: &str, user: &str) -> Result<(), TransportError> {
        let url = stop_url(&self.backend, task_id)?;
        let resp = self
            .post(url.as_str())
            .json(&serde_json::json!({ "user": user }))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(base_url: &str, api_key: &str) -> BackendConfig {
        BackendConfig {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            chat_path: "/chat-messages".to_string(),
            timeout_ms: 5_000,
        }
    }

    #[test]
    fn request_serializes_streaming_mode() {
        let request = ChatRequest::new("劳动合同的基本要素", "user-1").with_input("lang", "zh");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "query": "劳动合同的基本要素",
                "inputs": {"lang": "zh"},
                "response_mode": "streaming",
                "user": "user-1"
            })
        );
    }

    #[test]
    fn conversation_and_files_serialized_when_present() {
        let request = ChatRequest::new("q", "u")
            .with_conversation("c1")
            .with_file(json!({"type": "image", "transfer_method": "remote_url", "url": "https://x/y.png"}));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["conversation_id"], "c1");
        assert_eq!(value["files"][0]["type"], "image");
        assert_eq!(value["inputs"], json!({}));
    }

    #[test]
    fn empty_conversation_id_omitted() {
        let request = ChatRequest::new("q", "u").with_conversation("");
        assert_eq!(request.conversation_id, None);
    }

    #[test]
    fn stop_url_appends_task_segment() {
        let url = stop_url(&backend("https://api.dify.ai/v1", "k"), "task-9").unwrap();
        assert_eq!(url.as_str(), "https://api.dify.ai/v1/chat-messages/task-9/stop");
    }

    #[test]
    fn stop_url_escapes_task_id() {
        let url = stop_url(&backend("https://api.dify.ai/v1", "k"), "../x?y#z").unwrap();
        assert_eq!(url.path(), "/v1/chat-messages/..%2Fx%3Fy%23z/stop");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[tokio::test]
    async fn open_posts_with_bearer_and_streams_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat-messages"))
            .and(header("authorization", "Bearer app-key"))
            .and(body_json(json!({
                "query": "hi",
                "inputs": {},
                "response_mode": "streaming",
                "user": "u1"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("data: {\"event\":\"message\",\"answer\":\"ok\"}\n\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestTransport::from_config(&backend(&format!("{}/v1", server.uri()), "app-key"));
        let resp = transport.open(&ChatRequest::new("hi", "u1")).await.unwrap();
        assert_eq!(resp.status, 200);

        let chunks: Vec<Bytes> = resp.body.map(|c| c.unwrap()).collect().await;
        let body: Vec<u8> = chunks.concat();
        assert!(String::from_utf8(body).unwrap().contains("\"answer\":\"ok\""));
    }

    #[tokio::test]
    async fn open_returns_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat-messages"))
            .respond_with(ResponseTemplate::new(401).set_body_string("{\"message\":\"bad key\"}"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::from_config(&backend(&server.uri(), "wrong"));
        let resp = transport.open(&ChatRequest::new("hi", "u1")).await.unwrap();
        assert_eq!(resp.status, 401);
    }

    #[tokio::test]
    async fn open_connection_refused_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = ReqwestTransport::from_config(&backend(&format!("http://{addr}"), ""));
        let err = transport.open(&ChatRequest::new("hi", "u1")).await.unwrap_err();
        assert!(matches!(err, TransportError::Transport(_)));
    }

    #[tokio::test]
    async fn stop_posts_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat-messages/task-1/stop"))
            .and(body_json(json!({"user": "u1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestTransport::from_config(&backend(&server.uri(), "k"));
        transport.stop("task-1", "u1").await.unwrap();
    }

    #[tokio::test]
    async fn stop_failure_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat-messages/task-1/stop"))
            .respond_with(ResponseTemplate::new(404).set_body_string("task not found"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::from_config(&backend(&server.uri(), "k"));
        let err = transport.stop("task-1", "u1").await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Status {
                status: 404,
                body: "task not found".to_string()
            }
        );
    }
}
