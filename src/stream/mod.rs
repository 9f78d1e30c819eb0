// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

// Streaming chat event processing
//
// Responsibilities:
// - Reassemble newline-delimited frames from arbitrarily split byte chunks
// - Decode `data:` records into typed events, recognizing failure records
// - Suppress message tokens once a workflow run has started
// - Emit only the unseen suffix of a workflow's final answer
// - Memory-bounded: 1 MiB frame buffer, 1000 tracked identifiers
// - Report terminal errors exactly once, followed by completion
// - Cooperative cancellation at every chunk boundary

mod classifier;
mod processor;
mod reassembler;
mod sink;
mod state;
mod types;

pub use classifier::{decode_record, parse_record_line, RecordLine, RECORD_PREFIX, TERMINATOR};
pub use processor::{error_from_body, is_success, StreamProcessor};
pub use reassembler::FrameReassembler;
pub use sink::{ChannelSink, EventSink};
pub use state::{LineFlow, ProcessedIds, StreamState};
pub use types::{
    AgentThought, ChatEvent, ContentDelta, ContentMeta, EventRecord, MessageChunk, MessageEnd,
    MessageFile, MessageReplace, NodeData, NodeEvent, ProtocolFailure, StreamFailure,
    StreamOptions, StreamOutcome, WorkflowFinished, WorkflowRunData, WorkflowStarted,
    ERROR_BODY_LIMIT_BYTES, MAX_FRAME_BUFFER_BYTES, PROCESSED_ID_LIMIT,
};
