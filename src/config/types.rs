// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::time::Duration;

use crate::stream::StreamOptions;

/// Default path of the streaming chat endpoint, relative to `base_url`.
pub const DEFAULT_CHAT_PATH: &str = "/chat-messages";

/// Default deadline for one whole request, first byte to last.
pub const DEFAULT_TIMEOUT_MS: u64 = 100_000;

/// Smallest accepted frame buffer ceiling.
pub const MIN_BUFFER_BYTES: usize = 1024;

/// Parsed and validated chatflow config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub version: String,
    pub backend: BackendConfig,
    pub stream: StreamOptions,
}

/// Where and how to reach the chat backend.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// e.g. `https://api.dify.ai/v1`, without a trailing slash.
    pub base_url: String,
    pub api_key: String,
    pub chat_path: String,
    pub timeout_ms: u64,
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Full URL of the streaming chat endpoint.
    pub fn chat_url(&self) -> String {
        format!("{}{}", self.base_url, self.chat_path)
    }
}

// The API key never goes into logs.
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("chat_path", &self.chat_path)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}
