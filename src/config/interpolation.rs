// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

use super::error::ConfigError;

/// Replace every `${NAME}` in `input` using `lookup`.
///
/// An unterminated or empty reference is kept literally. A name `lookup`
/// cannot resolve is an error.
pub fn resolve_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(0) | None => {
                out.push_str("${");
                rest = after;
            }
            Some(end) => {
                let name = &after[..end];
                let value = lookup(name).ok_or_else(|| ConfigError::UndefinedVariable {
                    name: name.to_string(),
                })?;
                out.push_str(&value);
                rest = &after[end + 1..];
            }
        }
    }
    out.push_str(rest);

    Ok(out)
}

/// `resolve_with` backed by the process environment.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    resolve_with(input, |name| std::env::var(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HOST" => Some("api.example.com".to_string()),
            "KEY" => Some("app-123".to_string()),
            _ => None,
        }
    }

    #[test]
    fn plain_string_unchanged() {
        assert_eq!(resolve_with("https://x/v1", lookup).unwrap(), "https://x/v1");
    }

    #[test]
    fn references_replaced() {
        assert_eq!(
            resolve_with("https://${HOST}/v1?k=${KEY}", lookup).unwrap(),
            "https://api.example.com/v1?k=app-123"
        );
    }

    #[test]
    fn undefined_reference_is_error() {
        let err = resolve_with("${MISSING}", lookup).unwrap_err();
        assert!(matches!(err, ConfigError::UndefinedVariable { ref name } if name == "MISSING"));
    }

    #[test]
    fn malformed_references_kept_literally() {
        assert_eq!(resolve_with("a${}b", lookup).unwrap(), "a${}b");
        assert_eq!(resolve_with("a${KEY", lookup).unwrap(), "a${KEY");
        assert_eq!(resolve_with("$KEY", lookup).unwrap(), "$KEY");
    }
}
