// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

// Chat client
//
// Wires transport and processor together for one request at a time:
// - Open the stream, racing the caller's cancellation token
// - Hand status and body to a fresh processor run
// - Bound the whole exchange by the configured timeout

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::stream::{EventSink, StreamFailure, StreamOptions, StreamOutcome, StreamProcessor};
use crate::transport::{ChatRequest, ChatTransport, ReqwestTransport, TransportError};

/// Error code reported when the request deadline passes.
pub const TIMEOUT_CODE: &str = "timeout";

pub struct ChatClient {
    transport: Arc<dyn ChatTransport>,
    processor: StreamProcessor,
    timeout: Option<Duration>,
}

impl ChatClient {
    /// `timeout` bounds the whole exchange; `None` waits indefinitely.
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        options: StreamOptions,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            processor: StreamProcessor::new(options),
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(ReqwestTransport::from_config(&config.backend)),
            config.stream,
            Some(config.backend.timeout()),
        )
    }

    /// Send `request` and stream its events into `sink`.
    ///
    /// Exactly one `completed` notification is delivered unless the token is
    /// cancelled first.
    pub async fn send<S>(
        &self,
        request: &ChatRequest,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> StreamOutcome
    where
        S: EventSink + ?Sized,
    {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("chat", %request_id);

        async move {
            tracing::info!(
                user = %request.user,
                conversation_id = request.conversation_id.as_deref().unwrap_or(""),
                query_len = request.query.len(),
                "sending chat request"
            );

            let exchange = self.exchange(request, sink, cancel);
            let finished = match self.timeout {
                Some(limit) => tokio::time::timeout(limit, exchange).await.ok(),
                None => Some(exchange.await),
            };

            let outcome = match finished {
                Some(outcome) => outcome,
                None => {
                    tracing::warn!(timeout_ms = self.timeout_ms(), "chat request timed out");
                    sink.on_error("request timed out".to_string(), Some(TIMEOUT_CODE.to_string()));
                    sink.on_completed(true);
                    StreamOutcome::Failed(StreamFailure::Timeout)
                }
            };

            match &outcome {
                StreamOutcome::Completed => tracing::info!("chat request completed"),
                StreamOutcome::Cancelled => tracing::info!("chat request cancelled"),
                StreamOutcome::Failed(failure) => {
                    tracing::info!(error = %failure, "chat request failed")
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Ask the backend to stop generating. Pair with cancelling the token
    /// passed to `send`.
    pub async fn stop_responding(&self, task_id: &str, user: &str) -> Result<(), TransportError> {
        tracing::info!(task_id, "stopping generation");
        self.transport.stop(task_id, user).await
    }

    async fn exchange<S>(
        &self,
        request: &ChatRequest,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> StreamOutcome
    where
        S: EventSink + ?Sized,
    {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            opened = self.transport.open(request) => opened,
        };

        let response = match opened {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "failed to open chat stream");
                let (code, failure) = match &e {
                    TransportError::Timeout(_) => {
                        (Some(TIMEOUT_CODE.to_string()), StreamFailure::Timeout)
                    }
                    TransportError::Status { status, .. } => {
                        (Some(status.to_string()), StreamFailure::Status(*status))
                    }
                    TransportError::Transport(reason) => {
                        (None, StreamFailure::Transport(reason.clone()))
                    }
                };
                sink.on_error(e.to_string(), code);
                sink.on_completed(true);
                return StreamOutcome::Failed(failure);
            }
        };

        tracing::debug!(status = response.status, "chat stream opened");
        self.processor
            .run(response.status, response.body, sink, cancel)
            .await
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}
