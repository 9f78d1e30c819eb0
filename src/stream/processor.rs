// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

// Stream processor
//
// Takes a response status and a byte stream, pulls chunks one at a time,
// reassembles lines, and drives a sink through `StreamState`. The only
// suspension point is waiting for the next chunk, which races the caller's
// cancellation token.

use super::reassembler::FrameReassembler;
use super::sink::{ChannelSink, EventSink};
use super::state::{LineFlow, StreamState};
use super::types::{ChatEvent, StreamFailure, StreamOptions, StreamOutcome};
use bytes::Bytes;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// Consumes one streaming chat response per `run` call.
///
/// Holds only options; every run gets a fresh reassembler and state, so a
/// single processor can serve any number of concurrent streams.
#[derive(Debug, Clone, Default)]
pub struct StreamProcessor {
    options: StreamOptions,
}

impl StreamProcessor {
    pub fn new(options: StreamOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Consume `input` to the end, notifying `sink` along the way.
    ///
    /// Every outcome except `Cancelled` has delivered exactly one
    /// `completed` notification.
    pub async fn run<St, E, S>(
        &self,
        status: u16,
        mut input: St,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> StreamOutcome
    where
        St: Stream<Item = Result<Bytes, E>> + Unpin,
        E: fmt::Display,
        S: EventSink + ?Sized,
    {
        if !is_success(status) {
            return self.fail_status(status, input, sink, cancel).await;
        }

        let mut reassembler = FrameReassembler::new(self.options.max_buffer_bytes);
        let mut state = StreamState::new(self.options.processed_id_limit);
        let mut chunks = 0usize;
        let mut bytes_read = 0usize;

        tracing::debug!(status, "stream started");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(chunks, bytes_read, "stream cancelled");
                    return StreamOutcome::Cancelled;
                }
                next = input.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    chunks += 1;
                    bytes_read += chunk.len();
                    for line in reassembler.feed(&chunk) {
                        if state.process_line(&line, sink) == LineFlow::Terminate {
                            return terminated(&state, chunks, bytes_read);
                        }
                    }
                }
                Some(Err(e)) => {
                    let reason = e.to_string();
                    tracing::warn!(error = %reason, chunks, bytes_read, "stream read failed");
                    sink.on_error(format!("stream read failed: {reason}"), None);
                    sink.on_completed(true);
                    return StreamOutcome::Failed(StreamFailure::Transport(reason));
                }
                None => break,
            }
        }

        if let Some(line) = reassembler.finish() {
            if state.process_line(&line, sink) == LineFlow::Terminate {
                return terminated(&state, chunks, bytes_read);
            }
        }

        tracing::debug!(
            chunks,
            bytes_read,
            dropped_bytes = reassembler.dropped_bytes(),
            "stream finished"
        );
        sink.on_completed(false);
        StreamOutcome::Completed
    }

    /// Run on a tokio task and return the events as a stream.
    ///
    /// Dropping the returned stream does not stop the task; cancel the token
    /// for that.
    pub fn spawn<St, E>(
        &self,
        status: u16,
        input: St,
        cancel: CancellationToken,
    ) -> UnboundedReceiverStream<ChatEvent>
    where
        St: Stream<Item = Result<Bytes, E>> + Unpin + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let processor = self.clone();

        tokio::spawn(async move {
            let mut sink = ChannelSink::new(tx);
            processor.run(status, input, &mut sink, &cancel).await;
        });

        UnboundedReceiverStream::new(rx)
    }

    /// Non-success status: report the body's error and never parse records.
    async fn fail_status<St, E, S>(
        &self,
        status: u16,
        mut input: St,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> StreamOutcome
    where
        St: Stream<Item = Result<Bytes, E>> + Unpin,
        E: fmt::Display,
        S: EventSink + ?Sized,
    {
        let limit = self.options.error_body_limit;
        let mut body = Vec::new();

        while body.len() < limit {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamOutcome::Cancelled,
                next = input.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    let take = chunk.len().min(limit - body.len());
                    body.extend_from_slice(&chunk[..take]);
                }
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "error body read failed");
                    break;
                }
                None => break,
            }
        }

        let (message, code) = error_from_body(status, &body);
        tracing::warn!(status, message = %message, "backend rejected request");
        sink.on_error(message, Some(code));
        sink.on_completed(true);
        StreamOutcome::Failed(StreamFailure::Status(status))
    }
}

fn terminated(state: &StreamState, chunks: usize, bytes_read: usize) -> StreamOutcome {
    tracing::debug!(chunks, bytes_read, "stream terminated by failure record");
    match state.failure() {
        Some(failure) => StreamOutcome::Failed(StreamFailure::Protocol(failure.clone())),
        None => StreamOutcome::Completed,
    }
}

/// 2xx and 3xx responses are streamed.
pub fn is_success(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Extract `(message, code)` from a non-success response body.
///
/// A JSON body contributes `message` and `code`. Otherwise the body text is
/// the message, then `HTTP <status>`. The code falls back to the status.
pub fn error_from_body(status: u16, body: &[u8]) -> (String, String) {
    let json = serde_json::from_slice::<Value>(body).ok();

    let json_message = json
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string);
    let message = json_message.unwrap_or_else(|| {
        let text = String::from_utf8_lossy(body);
        let text = text.trim();
        if text.is_empty() {
            format!("HTTP {status}")
        } else {
            text.to_string()
        }
    });

    let code = match json.as_ref().and_then(|v| v.get("code")) {
        Some(Value::String(code)) if !code.is_empty() => code.clone(),
        Some(Value::Number(code)) => code.to_string(),
        _ => status.to_string(),
    };

    (message, code)
}
