use reqwest::header::HeaderMap;
use std::fmt;
use thiserror::Error;

/// Errors that can occur while resolving, sending or decoding a declared operation.
#[derive(Error, Debug)]
pub enum RestError {
    /// A host or path template references a placeholder with no binding.
    #[error("Unresolved placeholder `{{{placeholder}}}` in template `{template}`")]
    UnresolvedPlaceholder { placeholder: String, template: String },

    /// A required argument was not supplied for a binding.
    #[error("Missing argument `{0}`")]
    MissingArgument(String),

    /// The operation description itself is malformed.
    #[error("Invalid request template: {0}")]
    InvalidTemplate(String),

    /// A value cannot be placed in its target position.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The body produced a different number of bytes than declared.
    #[error("{0}")]
    BodyLength(#[from] BodyLengthError),

    /// The status matched a declared exception mapping.
    #[error("{exception}: {response}")]
    Service {
        exception: &'static str,
        response: HttpResponseError,
    },

    /// The status was unexpected and no exception mapping matched.
    #[error("{0}")]
    Http(HttpResponseError),

    /// A body could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The HTTP request failed at the transport level.
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Reading or writing a body stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The endpoint URL is invalid.
    #[error("Invalid endpoint URL: {message}")]
    InvalidEndpoint {
        message: String,
        #[source]
        source: Option<url::ParseError>,
    },

    /// A required configuration value is missing.
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    /// The response body was already consumed or released.
    #[error("Response body has already been consumed")]
    BodyConsumed,

    /// A continuation token was issued under a different protocol version.
    #[error("Continuation token was issued for api-version {actual}, expected {expected}")]
    ProtocolVersionMismatch { expected: String, actual: String },

    /// A serialized continuation token could not be read.
    #[error("Invalid continuation token: {0}")]
    InvalidContinuationToken(String),

    /// The caller asked for a result shape the template does not declare.
    #[error("Operation `{operation}` returns {declared}, not {requested}")]
    ReturnShapeMismatch {
        operation: String,
        declared: &'static str,
        requested: &'static str,
    },
}

impl RestError {
    /// Create an `InvalidEndpoint` error carrying the URL parse failure.
    pub fn invalid_endpoint_with_source(message: impl Into<String>, source: url::ParseError) -> Self {
        Self::InvalidEndpoint {
            message: format!("{}: {source}", message.into()),
            source: Some(source),
        }
    }

    /// Create an `InvalidEndpoint` error without an underlying cause.
    pub fn invalid_endpoint(message: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            message: message.into(),
            source: None,
        }
    }

    /// HTTP status of a status-mapped error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service { response, .. } | Self::Http(response) => Some(response.status),
            _ => None,
        }
    }

    /// The response details of a status-mapped error, if any.
    pub fn response(&self) -> Option<&HttpResponseError> {
        match self {
            Self::Service { response, .. } | Self::Http(response) => Some(response),
            _ => None,
        }
    }
}

/// Result type alias for engine operations.
pub type RestResult<T> = std::result::Result<T, RestError>;

/// Details of a response whose status was not expected.
#[derive(Debug, Clone)]
pub struct HttpResponseError {
    /// The HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Best-effort decoded error body.
    pub value: Option<serde_json::Value>,
    /// Sanitized and truncated message.
    pub message: String,
}

impl fmt::Display for HttpResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP error: {} - {}", self.status, self.message)
    }
}

/// Raised when a body's actual length differs from its declared length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyLengthError {
    /// Length taken from the declared length header.
    pub declared: u64,
    /// Bytes observed before the mismatch was detected.
    pub actual: u64,
}

impl BodyLengthError {
    /// `"less than"` or `"more than"`.
    pub fn relation(&self) -> &'static str {
        if self.actual < self.declared {
            "less than"
        } else {
            "more than"
        }
    }
}

impl fmt::Display for BodyLengthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Request body emitted {} bytes, {} the declared length of {} bytes",
            self.actual,
            self.relation(),
            self.declared
        )
    }
}

impl std::error::Error for BodyLengthError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_length_error_reports_direction() {
        let short = BodyLengthError { declared: 10, actual: 4 };
        assert!(short.to_string().contains("less than"));

        let long = BodyLengthError { declared: 4, actual: 5 };
        assert!(long.to_string().contains("more than"));
    }

    #[test]
    fn status_is_exposed_for_mapped_errors() {
        let response = HttpResponseError {
            status: 404,
            headers: HeaderMap::new(),
            value: None,
            message: "not found".into(),
        };
        let err = RestError::Service {
            exception: "ResourceNotFound",
            response,
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "ResourceNotFound: HTTP error: 404 - not found");
        assert!(RestError::BodyConsumed.status().is_none());
    }
}
