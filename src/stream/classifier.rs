// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

// Record classifier
//
// Decides whether a line carries an event record, decodes the JSON
// payload, and maps it onto the closed set of `EventRecord` variants.
// Failure-shaped records (HTTP-style status, `event: "error"`, missing or
// falsy `event`) are recognized before any typed decoding happens.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::types::{EventRecord, ProtocolFailure};

/// Prefix of lines that carry a record.
pub const RECORD_PREFIX: &str = "data:";

/// Payload meaning "no more records".
pub const TERMINATOR: &str = "[DONE]";

const UNKNOWN_ERROR_MESSAGE: &str = "unknown stream error";

// ---------------------------------------------------------------------------
// Line classification
// ---------------------------------------------------------------------------

/// What a single reassembled line contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLine<'a> {
    /// Not a `data:` line (blank separators, `event:` lines, comments, ...).
    NotARecord,
    /// A `data:` line with nothing after the prefix.
    Empty,
    /// `data: [DONE]`
    Terminator,
    /// The JSON text after the prefix.
    Payload(&'a str),
}

/// Classify a line by its prefix. One optional space after `data:` is
/// part of the prefix.
pub fn parse_record_line(line: &str) -> RecordLine<'_> {
    let Some(rest) = line.strip_prefix(RECORD_PREFIX) else {
        return RecordLine::NotARecord;
    };
    let payload = rest.strip_prefix(' ').unwrap_or(rest).trim();

    if payload.is_empty() {
        RecordLine::Empty
    } else if payload == TERMINATOR {
        RecordLine::Terminator
    } else {
        RecordLine::Payload(payload)
    }
}

// ---------------------------------------------------------------------------
// Record decoding
// ---------------------------------------------------------------------------

/// Parse a payload and classify it.
///
/// Errors mean the payload is not valid JSON, or a recognized record has
/// fields of the wrong type. Callers treat both as a truncated frame.
pub fn decode_record(payload: &str) -> Result<EventRecord, serde_json::Error> {
    let value: Value = serde_json::from_str(payload)?;
    classify(value)
}

/// Map a decoded JSON value onto an `EventRecord`.
pub fn classify(value: Value) -> Result<EventRecord, serde_json::Error> {
    let mut object = match value {
        Value::Object(object) => object,
        // Not an object, so there is no `event` field at all.
        _ => return Ok(EventRecord::Failure(missing_event())),
    };

    if let Some(failure) = failure_of(&object) {
        return Ok(EventRecord::Failure(failure));
    }

    let event = match object.remove("event") {
        Some(Value::String(event)) => event,
        Some(other) => return Ok(EventRecord::Unrecognized(other.to_string())),
        None => return Ok(EventRecord::Failure(missing_event())),
    };
    let body = Value::Object(object);

    let record = match event.as_str() {
        "message" => EventRecord::Message(typed(body)?),
        "agent_message" => EventRecord::AgentMessage(typed(body)?),
        "agent_thought" => EventRecord::AgentThought(typed(body)?),
        "message_file" => EventRecord::MessageFile(typed(body)?),
        "message_end" => EventRecord::MessageEnd(typed(body)?),
        "message_replace" => EventRecord::MessageReplace(typed(body)?),
        "workflow_started" => EventRecord::WorkflowStarted(typed(body)?),
        "workflow_finished" => EventRecord::WorkflowFinished(typed(body)?),
        "node_started" => EventRecord::NodeStarted(typed(body)?),
        "node_finished" => EventRecord::NodeFinished(typed(body)?),
        _ => EventRecord::Unrecognized(event),
    };
    Ok(record)
}

fn typed<T: DeserializeOwned>(body: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(body)
}

fn missing_event() -> ProtocolFailure {
    ProtocolFailure {
        message: UNKNOWN_ERROR_MESSAGE.to_string(),
        code: None,
        status: None,
    }
}

/// Detect a failure-shaped record.
///
/// - a numeric top-level `status` outside 2xx/3xx
/// - `event` equal to `"error"`
/// - `event` missing or falsy (`null`, `false`, `""`, `0`)
fn failure_of(object: &Map<String, Value>) -> Option<ProtocolFailure> {
    let status = object.get("status").and_then(Value::as_u64);
    let bad_status = status.is_some_and(|s| !(200..400).contains(&s));

    let event = object.get("event");
    let error_event = matches!(event, Some(Value::String(e)) if e == "error");

    if !(bad_status || error_event || is_falsy(event)) {
        return None;
    }

    let message = object
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or(UNKNOWN_ERROR_MESSAGE)
        .to_string();
    let code = match object.get("code") {
        Some(Value::String(code)) if !code.is_empty() => Some(code.clone()),
        Some(Value::Number(code)) => Some(code.to_string()),
        _ => None,
    };

    Some(ProtocolFailure {
        message,
        code,
        status: status.and_then(|s| u16::try_from(s).ok()),
    })
}

fn is_falsy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => !b,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::Array(_)) | Some(Value::Object(_)) => false,
    }
}
