// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

// Config loader and validator
//
// Loads chatflow.yaml, resolves `${VAR}` references, applies defaults and
// validates backend and stream settings.

mod error;
mod interpolation;
mod loader;
mod raw;
mod source;
mod types;

pub use error::ConfigError;
pub use interpolation::{resolve_variables, resolve_with};
pub use loader::load_config;
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::{
    BackendConfig, Config, DEFAULT_CHAT_PATH, DEFAULT_TIMEOUT_MS, MIN_BUFFER_BYTES,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamOptions;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn with_env<F: FnOnce()>(name: &str, value: Option<&str>, f: F) {
        let _guard = ENV_MUTEX.lock().unwrap();
        let previous = std::env::var(name).ok();
        match value {
            Some(v) => std::env::set_var(name, v),
            None => std::env::remove_var(name),
        }
        f();
        match previous {
            Some(v) => std::env::set_var(name, v),
            None => std::env::remove_var(name),
        }
    }

    fn load(yaml: &str) -> Result<Config, ConfigError> {
        load_config(&StringSource::new(yaml))
    }

    const FULL_YAML: &str = r#"chatflow: v1
backend:
  base_url: "https://api.dify.ai/v1/"
  api_key: "${CHATFLOW_TEST_KEY}"
  chat_path: "/chat-messages"
  timeout_ms: 30000
stream:
  max_buffer_bytes: 65536
  processed_id_limit: 200
  error_body_limit: 4096
"#;

    #[test]
    fn full_config_loads() {
        with_env("CHATFLOW_TEST_KEY", Some("app-secret"), || {
            let config = load(FULL_YAML).unwrap();
            assert_eq!(config.version, "v1");
            assert_eq!(config.backend.base_url, "https://api.dify.ai/v1");
            assert_eq!(config.backend.api_key, "app-secret");
            assert_eq!(config.backend.timeout().as_millis(), 30_000);
            assert_eq!(
                config.backend.chat_url(),
                "https://api.dify.ai/v1/chat-messages"
            );
            assert_eq!(
                config.stream,
                StreamOptions {
                    max_buffer_bytes: 65536,
                    processed_id_limit: 200,
                    error_body_limit: 4096,
                }
            );
        });
    }

    #[test]
    fn defaults_applied() {
        let config = load("chatflow: v1\nbackend:\n  base_url: http://localhost:5001/v1\n").unwrap();
        assert_eq!(config.backend.chat_path, DEFAULT_CHAT_PATH);
        assert_eq!(config.backend.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.backend.api_key, "");
        assert_eq!(config.stream, StreamOptions::default());
    }

    #[test]
    fn undefined_variable_rejected() {
        with_env("CHATFLOW_TEST_KEY", None, || {
            let err = load(FULL_YAML).unwrap_err();
            assert!(
                matches!(err, ConfigError::UndefinedVariable { ref name } if name == "CHATFLOW_TEST_KEY")
            );
        });
    }

    #[test]
    fn wrong_version_rejected() {
        let err = load("chatflow: v2\nbackend:\n  base_url: http://x\n").unwrap_err();
        assert!(err.to_string().contains("unsupported config version"));
    }

    #[test]
    fn missing_backend_is_yaml_error() {
        let err = load("chatflow: v1\n").unwrap_err();
        assert!(matches!(err, ConfigError::YamlError(_)));
    }

    #[test]
    fn unknown_field_is_yaml_error() {
        let err = load("chatflow: v1\nbackend:\n  base_url: http://x\n  retries: 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::YamlError(_)));
    }

    #[test]
    fn invalid_values_rejected() {
        let cases = [
            "chatflow: v1\nbackend:\n  base_url: ftp://x\n",
            "chatflow: v1\nbackend:\n  base_url: http://x\n  chat_path: chat-messages\n",
            "chatflow: v1\nbackend:\n  base_url: http://x\n  timeout_ms: 0\n",
            "chatflow: v1\nbackend:\n  base_url: http://x\nstream:\n  max_buffer_bytes: 100\n",
            "chatflow: v1\nbackend:\n  base_url: http://x\nstream:\n  processed_id_limit: 0\n",
        ];
        for yaml in cases {
            let err = load(yaml).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)), "expected validation error for {yaml:?}");
        }
    }

    #[test]
    fn api_key_redacted_in_debug() {
        let config = load("chatflow: v1\nbackend:\n  base_url: http://x\n  api_key: app-secret\n").unwrap();
        let debug = format!("{:?}", config.backend);
        assert!(!debug.contains("app-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let source = FileSource::new("/nonexistent/chatflow.yaml");
        assert!(!source.exists());
        assert!(matches!(load_config(&source), Err(ConfigError::IoError(_))));
    }
}
