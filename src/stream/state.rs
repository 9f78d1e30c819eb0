// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

// Stream state and deduplication
//
// Per-stream, exclusively owned. Applies one reassembled line at a time:
// - Message tokens are dropped once the stream has entered workflow mode
// - The final workflow answer only contributes the text not yet shown
// - A failure record is reported once and stops all later processing
// - Identifiers seen on the stream are kept in a bounded set

use std::collections::HashSet;

use super::classifier::{decode_record, parse_record_line, RecordLine};
use super::sink::EventSink;
use super::types::{
    ContentDelta, ContentMeta, EventRecord, MessageChunk, ProtocolFailure, RecordIds,
    WorkflowFinished, PROCESSED_ID_LIMIT,
};

/// Whether the caller should keep feeding lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFlow {
    Continue,
    /// A terminal record was seen; stop reading the stream.
    Terminate,
}

// ---------------------------------------------------------------------------
// Processed ids
// ---------------------------------------------------------------------------

/// Identifiers seen on one stream, kept for diagnostics only.
///
/// Nothing is filtered against this set: a record whose ids were already
/// seen is applied like any other. It feeds the first-sighting debug log
/// and is cleared entirely once it grows past `limit`.
#[derive(Debug, Clone)]
pub struct ProcessedIds {
    ids: HashSet<String>,
    limit: usize,
}

impl ProcessedIds {
    pub fn new(limit: usize) -> Self {
        Self {
            ids: HashSet::new(),
            limit,
        }
    }

    /// Returns true on first sighting.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Clear the set if it exceeds the limit. Returns true if it was cleared.
    pub fn enforce_bound(&mut self) -> bool {
        if self.ids.len() > self.limit {
            tracing::debug!(size = self.ids.len(), limit = self.limit, "clearing processed ids");
            self.ids.clear();
            true
        } else {
            false
        }
    }
}

impl Default for ProcessedIds {
    fn default() -> Self {
        Self::new(PROCESSED_ID_LIMIT)
    }
}

// ---------------------------------------------------------------------------
// Stream state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StreamState {
    is_first_content_emitted: bool,
    /// Sticky once `workflow_started` has been seen.
    workflow_mode_entered: bool,
    /// Answer text already forwarded to the sink.
    last_emitted_answer: String,
    /// Diagnostic only; never suppresses a record.
    processed_ids: ProcessedIds,
    conversation_id: Option<String>,
    message_id: Option<String>,
    task_id: Option<String>,
    terminated: bool,
    failure: Option<ProtocolFailure>,
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new(PROCESSED_ID_LIMIT)
    }
}

impl StreamState {
    pub fn new(processed_id_limit: usize) -> Self {
        Self {
            is_first_content_emitted: false,
            workflow_mode_entered: false,
            last_emitted_answer: String::new(),
            processed_ids: ProcessedIds::new(processed_id_limit),
            conversation_id: None,
            message_id: None,
            task_id: None,
            terminated: false,
            failure: None,
        }
    }

    /// Apply one line and notify `sink` of whatever it produces.
    pub fn process_line<S: EventSink + ?Sized>(&mut self, line: &str, sink: &mut S) -> LineFlow {
        if self.terminated {
            return LineFlow::Terminate;
        }
        self.processed_ids.enforce_bound();

        let payload = match parse_record_line(line) {
            RecordLine::Payload(payload) => payload,
            RecordLine::NotARecord => {
                if !line.is_empty() {
                    tracing::trace!(line, "ignoring non-record line");
                }
                return LineFlow::Continue;
            }
            RecordLine::Empty | RecordLine::Terminator => return LineFlow::Continue,
        };

        match decode_record(payload) {
            Ok(record) => self.apply(record, sink),
            Err(e) => {
                tracing::debug!(error = %e, len = payload.len(), "undecodable record payload");
                self.emit_liveness(sink);
                LineFlow::Continue
            }
        }
    }

    /// Apply one decoded record.
    pub fn apply<S: EventSink + ?Sized>(&mut self, record: EventRecord, sink: &mut S) -> LineFlow {
        if self.terminated {
            return LineFlow::Terminate;
        }
        self.track_ids(record.ids());

        match record {
            EventRecord::Failure(failure) => {
                tracing::warn!(
                    message = %failure.message,
                    code = failure.code.as_deref().unwrap_or(""),
                    status = failure.status,
                    "backend reported stream failure"
                );
                sink.on_error(failure.message.clone(), failure.code.clone());
                sink.on_completed(true);
                self.failure = Some(failure);
                self.terminated = true;
                return LineFlow::Terminate;
            }
            EventRecord::Message(chunk) | EventRecord::AgentMessage(chunk) => {
                self.apply_message(chunk, sink);
            }
            EventRecord::WorkflowStarted(started) => {
                self.workflow_mode_entered = true;
                sink.on_workflow_started(started);
            }
            EventRecord::WorkflowFinished(finished) => {
                self.apply_workflow_finished(finished, sink);
            }
            EventRecord::AgentThought(thought) => sink.on_thought(thought),
            EventRecord::MessageFile(file) => sink.on_file(file),
            EventRecord::MessageEnd(end) => sink.on_message_end(end),
            EventRecord::MessageReplace(replace) => sink.on_message_replace(replace),
            EventRecord::NodeStarted(node) => sink.on_node_started(node),
            EventRecord::NodeFinished(node) => sink.on_node_finished(node),
            EventRecord::Unrecognized(event) => {
                tracing::trace!(event = %event, "ignoring unrecognized event");
            }
        }
        LineFlow::Continue
    }

    fn apply_message<S: EventSink + ?Sized>(&mut self, chunk: MessageChunk, sink: &mut S) {
        if self.workflow_mode_entered {
            tracing::trace!("dropping message token in workflow mode");
            return;
        }
        let Some(answer) = chunk.answer.filter(|a| !a.is_empty()) else {
            return;
        };
        self.last_emitted_answer.push_str(&answer);
        self.emit_content(answer, sink);
    }

    fn apply_workflow_finished<S: EventSink + ?Sized>(
        &mut self,
        finished: WorkflowFinished,
        sink: &mut S,
    ) {
        let unseen = match finished.answer() {
            Some(answer) if !answer.is_empty() => {
                if self.last_emitted_answer.is_empty() {
                    self.last_emitted_answer = answer.to_string();
                    Some(answer.to_string())
                } else if answer.len() > self.last_emitted_answer.len()
                    && answer.starts_with(self.last_emitted_answer.as_str())
                {
                    let suffix = answer[self.last_emitted_answer.len()..].to_string();
                    self.last_emitted_answer = answer.to_string();
                    Some(suffix)
                } else {
                    tracing::trace!("final answer already emitted");
                    None
                }
            }
            _ => None,
        };

        if let Some(text) = unseen {
            self.emit_content(text, sink);
        }
        sink.on_workflow_finished(finished);
    }

    fn emit_content<S: EventSink + ?Sized>(&mut self, text: String, sink: &mut S) {
        let is_first = !self.is_first_content_emitted;
        self.is_first_content_emitted = true;
        sink.on_content(ContentDelta {
            text,
            is_first,
            meta: self.meta(),
        });
    }

    /// Empty delta after an undecodable payload, so the consumer knows the
    /// stream is still alive. Only sent once an identifier is known.
    fn emit_liveness<S: EventSink + ?Sized>(&self, sink: &mut S) {
        if self.conversation_id.is_none() && self.message_id.is_none() {
            return;
        }
        sink.on_content(ContentDelta {
            text: String::new(),
            is_first: false,
            meta: self.meta(),
        });
    }

    fn track_ids(&mut self, ids: RecordIds<'_>) {
        if let Some(id) = ids.conversation_id {
            self.conversation_id = Some(id.to_string());
        }
        if let Some(id) = ids.message_id {
            self.message_id = Some(id.to_string());
        }
        if let Some(id) = ids.task_id {
            self.task_id = Some(id.to_string());
        }

        let all = [
            ids.conversation_id,
            ids.message_id,
            ids.task_id,
            ids.workflow_run_id,
        ];
        for id in all.into_iter().flatten() {
            if self.processed_ids.insert(id) {
                tracing::debug!(id, "first sighting of stream identifier");
            }
        }
    }

    fn meta(&self) -> ContentMeta {
        ContentMeta {
            conversation_id: self.conversation_id.clone(),
            message_id: self.message_id.clone(),
            task_id: self.task_id.clone(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn failure(&self) -> Option<&ProtocolFailure> {
        self.failure.as_ref()
    }

    pub fn is_first_content_emitted(&self) -> bool {
        self.is_first_content_emitted
    }

    pub fn workflow_mode_entered(&self) -> bool {
        self.workflow_mode_entered
    }

    pub fn last_emitted_answer(&self) -> &str {
        &self.last_emitted_answer
    }

    pub fn processed_ids(&self) -> &ProcessedIds {
        &self.processed_ids
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }
}
