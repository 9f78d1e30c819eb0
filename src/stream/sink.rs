// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

// Event sinks
//
// The single output surface of the processor. One method per event kind;
// every default forwards a `ChatEvent` to `on_event`, so an implementation
// can override only the kinds it renders, or just the catch-all.

use tokio::sync::mpsc;

use super::types::{
    AgentThought, ChatEvent, ContentDelta, MessageEnd, MessageFile, MessageReplace, NodeEvent,
    WorkflowFinished, WorkflowStarted,
};

/// Receives classified, deduplicated events in emission order.
///
/// Methods are synchronous: they run between two chunk reads and must not
/// block.
pub trait EventSink: Send {
    /// Catch-all for every kind that is not overridden.
    fn on_event(&mut self, event: ChatEvent) {
        let _ = event;
    }

    fn on_content(&mut self, delta: ContentDelta) {
        self.on_event(ChatEvent::Content(delta));
    }

    fn on_thought(&mut self, thought: AgentThought) {
        self.on_event(ChatEvent::Thought(thought));
    }

    fn on_file(&mut self, file: MessageFile) {
        self.on_event(ChatEvent::File(file));
    }

    fn on_message_end(&mut self, end: MessageEnd) {
        self.on_event(ChatEvent::MessageEnd(end));
    }

    fn on_message_replace(&mut self, replace: MessageReplace) {
        self.on_event(ChatEvent::MessageReplace(replace));
    }

    fn on_workflow_started(&mut self, started: WorkflowStarted) {
        self.on_event(ChatEvent::WorkflowStarted(started));
    }

    fn on_workflow_finished(&mut self, finished: WorkflowFinished) {
        self.on_event(ChatEvent::WorkflowFinished(finished));
    }

    fn on_node_started(&mut self, node: NodeEvent) {
        self.on_event(ChatEvent::NodeStarted(node));
    }

    fn on_node_finished(&mut self, node: NodeEvent) {
        self.on_event(ChatEvent::NodeFinished(node));
    }

    fn on_error(&mut self, message: String, code: Option<String>) {
        self.on_event(ChatEvent::Error { message, code });
    }

    fn on_completed(&mut self, has_error: bool) {
        self.on_event(ChatEvent::Completed { has_error });
    }
}

/// Collects every event, in order.
impl EventSink for Vec<ChatEvent> {
    fn on_event(&mut self, event: ChatEvent) {
        self.push(event);
    }
}

/// Forwards every event onto a channel.
///
/// A dropped receiver is not an error for the stream: events are discarded
/// and processing continues until the stream ends or is cancelled.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ChatEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn on_event(&mut self, event: ChatEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}
