// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// Wire records decoded from `data:` lines, the semantic events handed to
// sinks, processor options, and run outcomes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Default ceiling for the frame buffer in bytes.
pub const MAX_FRAME_BUFFER_BYTES: usize = 1_048_576; // 1 MiB

/// Default size above which the processed-id set is cleared.
pub const PROCESSED_ID_LIMIT: usize = 1_000;

/// Default number of body bytes read from a non-success response when
/// building the error notification.
pub const ERROR_BODY_LIMIT_BYTES: usize = 65_536;

/// Tunables for one processor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Ceiling for the unterminated-line buffer.
    pub max_buffer_bytes: usize,
    /// The processed-id set is cleared once it grows past this size.
    pub processed_id_limit: usize,
    /// How much of a non-success response body is read for the error message.
    pub error_body_limit: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            max_buffer_bytes: MAX_FRAME_BUFFER_BYTES,
            processed_id_limit: PROCESSED_ID_LIMIT,
            error_body_limit: ERROR_BODY_LIMIT_BYTES,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

// Only answers and identifiers are read by the processor and decoded
// strictly. Every other field is passed through: a value of an unexpected
// type becomes the field's default instead of failing the whole record.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Answer token from a `message` or `agent_message` record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageChunk {
    pub id: Option<String>,
    pub task_id: Option<String>,
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub answer: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One reasoning / tool-use step of an agent (`agent_thought`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentThought {
    pub id: Option<String>,
    pub task_id: Option<String>,
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub position: Option<u32>,
    #[serde(deserialize_with = "lenient")]
    pub thought: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub observation: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub tool: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub tool_input: Option<String>,
    pub message_files: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A file attached to the answer (`message_file`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageFile {
    pub id: Option<String>,
    #[serde(rename = "type", deserialize_with = "lenient")]
    pub file_type: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub belongs_to: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub url: Option<String>,
    pub conversation_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// End of one answer message, with usage / retriever metadata (`message_end`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageEnd {
    pub id: Option<String>,
    pub task_id: Option<String>,
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub metadata: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Moderation replaced the whole answer (`message_replace`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageReplace {
    pub task_id: Option<String>,
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub answer: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A workflow run began (`workflow_started`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowStarted {
    pub task_id: Option<String>,
    pub workflow_run_id: Option<String>,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub data: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A workflow run ended (`workflow_finished`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowFinished {
    pub task_id: Option<String>,
    pub workflow_run_id: Option<String>,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub data: Option<WorkflowRunData>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowRunData {
    #[serde(deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub workflow_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub status: Option<String>,
    pub outputs: Option<Value>,
    pub error: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowFinished {
    /// The final answer at `data.outputs.answer`, if it is a string.
    pub fn answer(&self) -> Option<&str> {
        self.data
            .as_ref()?
            .outputs
            .as_ref()?
            .get("answer")?
            .as_str()
    }
}

/// A workflow node began or ended (`node_started` / `node_finished`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeEvent {
    pub task_id: Option<String>,
    pub workflow_run_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub data: Option<NodeData>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeData {
    #[serde(deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub node_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub node_type: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An explicit failure record from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolFailure {
    pub message: String,
    pub code: Option<String>,
    pub status: Option<u16>,
}

/// One decoded event record, tagged by its `event` discriminant.
#[derive(Debug, Clone, PartialEq)]
pub enum EventRecord {
    Message(MessageChunk),
    AgentMessage(MessageChunk),
    AgentThought(AgentThought),
    MessageFile(MessageFile),
    MessageEnd(MessageEnd),
    MessageReplace(MessageReplace),
    WorkflowStarted(WorkflowStarted),
    WorkflowFinished(WorkflowFinished),
    NodeStarted(NodeEvent),
    NodeFinished(NodeEvent),
    /// HTTP-style failure status, `event: "error"`, or a missing/falsy `event`.
    Failure(ProtocolFailure),
    /// Any other discriminant (`ping`, `tts_message`, ...). Ignored.
    Unrecognized(String),
}

/// Identifiers a record establishes for the rest of the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordIds<'a> {
    pub conversation_id: Option<&'a str>,
    pub message_id: Option<&'a str>,
    pub task_id: Option<&'a str>,
    pub workflow_run_id: Option<&'a str>,
}

impl EventRecord {
    pub fn ids(&self) -> RecordIds<'_> {
        match self {
            EventRecord::Message(m) | EventRecord::AgentMessage(m) => RecordIds {
                conversation_id: m.conversation_id.as_deref(),
                message_id: m.message_id.as_deref().or(m.id.as_deref()),
                task_id: m.task_id.as_deref(),
                workflow_run_id: None,
            },
            EventRecord::AgentThought(t) => RecordIds {
                conversation_id: t.conversation_id.as_deref(),
                message_id: t.message_id.as_deref(),
                task_id: t.task_id.as_deref(),
                workflow_run_id: None,
            },
            EventRecord::MessageFile(f) => RecordIds {
                conversation_id: f.conversation_id.as_deref(),
                ..RecordIds::default()
            },
            EventRecord::MessageEnd(e) => RecordIds {
                conversation_id: e.conversation_id.as_deref(),
                message_id: e.message_id.as_deref().or(e.id.as_deref()),
                task_id: e.task_id.as_deref(),
                workflow_run_id: None,
            },
            EventRecord::MessageReplace(r) => RecordIds {
                conversation_id: r.conversation_id.as_deref(),
                message_id: r.message_id.as_deref(),
                task_id: r.task_id.as_deref(),
                workflow_run_id: None,
            },
            EventRecord::WorkflowStarted(w) => RecordIds {
                conversation_id: w.conversation_id.as_deref(),
                message_id: w.message_id.as_deref(),
                task_id: w.task_id.as_deref(),
                workflow_run_id: w.workflow_run_id.as_deref(),
            },
            EventRecord::WorkflowFinished(w) => RecordIds {
                conversation_id: w.conversation_id.as_deref(),
                message_id: w.message_id.as_deref(),
                task_id: w.task_id.as_deref(),
                workflow_run_id: w.workflow_run_id.as_deref(),
            },
            EventRecord::NodeStarted(n) | EventRecord::NodeFinished(n) => RecordIds {
                task_id: n.task_id.as_deref(),
                workflow_run_id: n.workflow_run_id.as_deref(),
                ..RecordIds::default()
            },
            EventRecord::Failure(_) | EventRecord::Unrecognized(_) => RecordIds::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Semantic events
// ---------------------------------------------------------------------------

/// Identifiers attached to a content delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentMeta {
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub task_id: Option<String>,
}

/// An increment of visible answer text. Deltas concatenate to the answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentDelta {
    pub text: String,
    /// True only for the first delta carrying content on this stream.
    pub is_first: bool,
    pub meta: ContentMeta,
}

/// Everything a sink can be told, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatEvent {
    Content(ContentDelta),
    Thought(AgentThought),
    File(MessageFile),
    MessageEnd(MessageEnd),
    MessageReplace(MessageReplace),
    WorkflowStarted(WorkflowStarted),
    WorkflowFinished(WorkflowFinished),
    NodeStarted(NodeEvent),
    NodeFinished(NodeEvent),
    Error {
        message: String,
        code: Option<String>,
    },
    Completed {
        has_error: bool,
    },
}

impl ChatEvent {
    /// Task id carried by the event, if any. Needed to stop a generation.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            ChatEvent::Content(d) => d.meta.task_id.as_deref(),
            ChatEvent::Thought(t) => t.task_id.as_deref(),
            ChatEvent::MessageEnd(e) => e.task_id.as_deref(),
            ChatEvent::MessageReplace(r) => r.task_id.as_deref(),
            ChatEvent::WorkflowStarted(w) => w.task_id.as_deref(),
            ChatEvent::WorkflowFinished(w) => w.task_id.as_deref(),
            ChatEvent::NodeStarted(n) | ChatEvent::NodeFinished(n) => n.task_id.as_deref(),
            ChatEvent::File(_) | ChatEvent::Error { .. } | ChatEvent::Completed { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a stream ended with an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFailure {
    /// The response status was not 2xx/3xx.
    Status(u16),
    /// The backend sent a failure record.
    Protocol(ProtocolFailure),
    /// Opening or reading the byte stream failed.
    Transport(String),
    /// The surrounding request exceeded its deadline.
    Timeout,
}

impl fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFailure::Status(status) => write!(f, "backend responded with HTTP {status}"),
            StreamFailure::Protocol(failure) => match &failure.code {
                Some(code) => write!(f, "backend error [{code}]: {}", failure.message),
                None => write!(f, "backend error: {}", failure.message),
            },
            StreamFailure::Transport(reason) => write!(f, "stream transport failed: {reason}"),
            StreamFailure::Timeout => write!(f, "request timed out"),
        }
    }
}

/// How a processor run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// End of data reached without a terminal error.
    Completed,
    /// A terminal error was reported through the sink.
    Failed(StreamFailure),
    /// The caller cancelled; the completion sink was not invoked.
    Cancelled,
}

impl StreamOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, StreamOutcome::Completed)
    }
}
