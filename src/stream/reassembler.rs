// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

// Frame reassembler
//
// Turns arbitrarily split byte chunks into complete text lines:
// - UTF-8 decoding that carries an incomplete trailing sequence over to
//   the next chunk instead of corrupting it
// - Line splitting on `\n` (a trailing `\r` is stripped)
// - Memory-bounded: the unterminated fragment never outlives a feed call
//   larger than the configured ceiling

use super::types::MAX_FRAME_BUFFER_BYTES;

/// Reassembles newline-terminated lines from a byte stream.
///
/// One instance per stream. Lines are returned without their terminator.
#[derive(Debug)]
pub struct FrameReassembler {
    /// Text after the last line terminator seen so far.
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence (at most 3).
    carry: Vec<u8>,
    /// Ceiling for `buffer`.
    max_buffer_bytes: usize,
    /// Set after an overflow; input is dropped until the next `\n`.
    discarding: bool,
    /// Total bytes of text dropped by overflow handling.
    dropped_bytes: usize,
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new(MAX_FRAME_BUFFER_BYTES)
    }
}

impl FrameReassembler {
    pub fn new(max_buffer_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            carry: Vec::new(),
            max_buffer_bytes,
            discarding: false,
            dropped_bytes: 0,
        }
    }

    /// Feed one chunk and return every line it completed, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        if chunk.is_empty() {
            return Vec::new();
        }

        let text = self.decode(chunk);
        let mut lines = Vec::new();
        let mut rest = text.as_str();

        while let Some(newline_pos) = rest.find('\n') {
            let segment = &rest[..newline_pos];
            rest = &rest[newline_pos + 1..];

            if self.discarding {
                // Tail of an oversized line: drop it and resync here.
                self.dropped_bytes += segment.len();
                self.discarding = false;
                continue;
            }

            self.buffer.push_str(segment);
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }

        if self.discarding {
            self.dropped_bytes += rest.len();
        } else {
            self.buffer.push_str(rest);
            if self.buffer.len() > self.max_buffer_bytes {
                tracing::warn!(
                    buffered = self.buffer.len(),
                    limit = self.max_buffer_bytes,
                    "frame buffer overflow, discarding unterminated line"
                );
                self.dropped_bytes += self.buffer.len();
                self.buffer = String::new();
                self.discarding = true;
            }
        }

        lines
    }

    /// Flush at end of data: returns the final unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if !self.carry.is_empty() {
            let tail = String::from_utf8_lossy(&self.carry).into_owned();
            self.carry.clear();
            if !self.discarding {
                self.buffer.push_str(&tail);
            }
        }

        if self.discarding {
            self.discarding = false;
            return None;
        }

        let mut line = std::mem::take(&mut self.buffer);
        if line.ends_with('\r') {
            line.pop();
        }
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }

    /// Bytes currently held for an unterminated line.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes dropped by overflow handling since construction.
    pub fn dropped_bytes(&self) -> usize {
        self.dropped_bytes
    }

    /// Decode `chunk` prefixed by any carried bytes. An incomplete sequence
    /// at the very end is carried to the next call; invalid sequences become
    /// U+FFFD.
    fn decode(&mut self, chunk: &[u8]) -> String {
        let owned;
        let mut input: &[u8] = if self.carry.is_empty() {
            chunk
        } else {
            let mut joined = std::mem::take(&mut self.carry);
            joined.extend_from_slice(chunk);
            owned = joined;
            &owned
        };

        let mut out = String::with_capacity(input.len());
        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = input.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &after[bad..];
                        }
                        None => {
                            self.carry.extend_from_slice(after);
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}
