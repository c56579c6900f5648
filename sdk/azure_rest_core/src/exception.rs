//! Mapping of unexpected status codes to declared exception types.
//!
//! A template may carry several [`ExceptionMapping`]s. Resolution follows
//! two rules:
//!
//! 1. A mapping keyed by an explicit status set that contains the status
//!    beats any `Default` mapping.
//! 2. Among mappings of the same rank, the **last declared** wins.
//!
//! Later declarations therefore override earlier ones on conflict. This is
//! the contract generated clients rely on; do not change it to first-match.

use crate::error::{HttpResponseError, RestError};
use bytes::Bytes;
use reqwest::header::HeaderMap;
use std::collections::BTreeSet;

/// Maximum length for error messages to prevent sensitive data leaks.
const MAX_ERROR_MESSAGE_LEN: usize = 1000;

/// Name of a declared exception type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionType {
    name: &'static str,
}

impl ExceptionType {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Which statuses a mapping applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusKey {
    Codes(BTreeSet<u16>),
    Default,
}

impl StatusKey {
    fn matches(&self, status: u16) -> bool {
        match self {
            Self::Codes(codes) => codes.contains(&status),
            Self::Default => true,
        }
    }
}

/// One declared status → exception rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionMapping {
    key: StatusKey,
    exception: ExceptionType,
}

impl ExceptionMapping {
    /// Map an explicit set of statuses.
    pub fn for_statuses(statuses: impl IntoIterator<Item = u16>, exception: ExceptionType) -> Self {
        Self {
            key: StatusKey::Codes(statuses.into_iter().collect()),
            exception,
        }
    }

    /// Map every status not claimed by an explicit mapping.
    pub fn default_for(exception: ExceptionType) -> Self {
        Self {
            key: StatusKey::Default,
            exception,
        }
    }

    pub fn key(&self) -> &StatusKey {
        &self.key
    }

    pub fn exception(&self) -> ExceptionType {
        self.exception
    }
}

/// Select the winning exception type for `status`, if any mapping applies.
pub fn select_exception(mappings: &[ExceptionMapping], status: u16) -> Option<ExceptionType> {
    let explicit = mappings
        .iter()
        .rev()
        .find(|m| matches!(m.key, StatusKey::Codes(_)) && m.key.matches(status));

    explicit
        .or_else(|| {
            mappings
                .iter()
                .rev()
                .find(|m| m.key == StatusKey::Default)
        })
        .map(|m| m.exception)
}

/// Build the error for an unexpected response.
///
/// The body is decoded best-effort: JSON when it parses, the raw text
/// otherwise, nothing when it is empty.
pub fn map_error(
    mappings: &[ExceptionMapping],
    status: u16,
    headers: HeaderMap,
    body: &Bytes,
) -> RestError {
    let text = String::from_utf8_lossy(body);
    let value = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice::<serde_json::Value>(body)
                .unwrap_or_else(|_| serde_json::Value::String(text.to_string())),
        )
    };

    let message = value
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(truncate_message)
        .unwrap_or_else(|| truncate_message(&text));

    let response = HttpResponseError {
        status,
        headers,
        value,
        message,
    };

    match select_exception(mappings, status) {
        Some(exception) => {
            tracing::debug!(status, exception = exception.name(), "mapped error response");
            RestError::Service {
                exception: exception.name(),
                response,
            }
        }
        None => {
            tracing::debug!(status, "unmapped error response");
            RestError::Http(response)
        }
    }
}

const REDACTED: &str = "[REDACTED]";

/// Length of the secret at the start of `s`, up to whitespace, a quote or a comma.
fn secret_len(s: &str) -> usize {
    s.find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | ','))
        .unwrap_or(s.len())
}

/// Replace bearer tokens and `sk-` keys with `[REDACTED]` in a single pass.
pub(crate) fn sanitize_error_message(msg: &str) -> String {
    let mut out = String::with_capacity(msg.len());
    let mut rest = msg;

    loop {
        if let Some(after) = rest.strip_prefix("Bearer ") {
            out.push_str("Bearer ");
            let len = secret_len(after);
            if len > 0 {
                out.push_str(REDACTED);
            }
            rest = &after[len..];
            continue;
        }

        if rest.starts_with("sk-") {
            let len = secret_len(rest);
            if len > 3 {
                out.push_str(REDACTED);
                rest = &rest[len..];
                continue;
            }
        }

        let mut chars = rest.chars();
        match chars.next() {
            Some(c) => {
                out.push(c);
                rest = chars.as_str();
            }
            None => return out,
        }
    }
}

/// Sanitize, then truncate a message if it exceeds the maximum length.
pub(crate) fn truncate_message(msg: &str) -> String {
    let sanitized = sanitize_error_message(msg);

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let mut cut = MAX_ERROR_MESSAGE_LEN;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... (truncated)", &sanitized[..cut])
    } else {
        sanitized
    }
}
