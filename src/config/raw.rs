// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

// Raw YAML deserialization types (internal)
//
// Optional fields stay optional here; defaults and interpolation are
// applied while building the public `Config`.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub chatflow: String,
    pub backend: RawBackend,
    pub stream: Option<RawStream>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawBackend {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub chat_path: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStream {
    pub max_buffer_bytes: Option<usize>,
    pub processed_id_limit: Option<usize>,
    pub error_body_limit: Option<usize>,
}
