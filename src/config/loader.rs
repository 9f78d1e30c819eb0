// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

use crate::stream::StreamOptions;

use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate a chatflow config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Parse into raw deserialization types
/// 3. Check the version
/// 4. Resolve `${VAR}` references in `base_url` and `api_key`
/// 5. Apply defaults and validate values
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.chatflow != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.chatflow
        )));
    }

    let backend = build_backend_config(raw.backend)?;
    let stream = build_stream_options(raw.stream.unwrap_or_default())?;

    tracing::debug!(
        source = %source.describe(),
        base_url = %backend.base_url,
        timeout_ms = backend.timeout_ms,
        "config loaded"
    );

    Ok(Config {
        version: raw.chatflow,
        backend,
        stream,
    })
}

fn build_backend_config(raw: raw::RawBackend) -> Result<BackendConfig, ConfigError> {
    let base_url = resolve_variables(&raw.base_url)?
        .trim_end_matches('/')
        .to_string();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "backend.base_url \"{base_url}\" must start with http:// or https://"
        )));
    }

    let api_key = resolve_variables(&raw.api_key)?;

    let chat_path = raw.chat_path.unwrap_or_else(|| DEFAULT_CHAT_PATH.to_string());
    if !chat_path.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "backend.chat_path \"{chat_path}\" must start with '/'"
        )));
    }

    let timeout_ms = raw.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "backend.timeout_ms must be greater than 0".to_string(),
        ));
    }

    Ok(BackendConfig {
        base_url,
        api_key,
        chat_path,
        timeout_ms,
    })
}

fn build_stream_options(raw: raw::RawStream) -> Result<StreamOptions, ConfigError> {
    let defaults = StreamOptions::default();

    let max_buffer_bytes = raw.max_buffer_bytes.unwrap_or(defaults.max_buffer_bytes);
    if max_buffer_bytes < MIN_BUFFER_BYTES {
        return Err(ConfigError::Validation(format!(
            "stream.max_buffer_bytes must be at least {MIN_BUFFER_BYTES}, got {max_buffer_bytes}"
        )));
    }

    let processed_id_limit = raw.processed_id_limit.unwrap_or(defaults.processed_id_limit);
    if processed_id_limit == 0 {
        return Err(ConfigError::Validation(
            "stream.processed_id_limit must be greater than 0".to_string(),
        ));
    }

    Ok(StreamOptions {
        max_buffer_bytes,
        processed_id_limit,
        error_body_limit: raw.error_body_limit.unwrap_or(defaults.error_body_limit),
    })
}
