//! Percent-encoding of single argument values for their URL or header position.
//!
//! Values bound with `encoded = true` are trusted as already valid and
//! inserted verbatim. Everything else is encoded exactly once, at
//! resolution time.

use crate::error::{RestError, RestResult};
use crate::template::Location;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::borrow::Cow;

/// Characters escaped inside a single path segment or host label.
///
/// `/` is always escaped so a value can never introduce an extra segment.
pub const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b'@')
    .remove(b':');

/// Characters escaped inside a query value.
pub const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b',')
    .remove(b';')
    .remove(b'@')
    .remove(b':')
    .remove(b'/')
    .remove(b'?');

/// Encode `value` for placement at `location`.
///
/// Body values are never passed through here.
pub fn encode_value<'a>(
    name: &str,
    value: &'a str,
    location: Location,
    encoded: bool,
) -> RestResult<Cow<'a, str>> {
    match location {
        Location::Header => validate_header_value(name, value).map(|()| Cow::Borrowed(value)),
        Location::Host if value.is_empty() => Err(RestError::Encoding(format!(
            "host parameter `{name}` must not be empty"
        ))),
        _ if encoded => Ok(Cow::Borrowed(value)),
        Location::Host | Location::Path => Ok(utf8_percent_encode(value, PATH_SEGMENT).into()),
        Location::Query => Ok(utf8_percent_encode(value, QUERY_VALUE).into()),
        Location::Body => Err(RestError::Encoding(format!(
            "body parameter `{name}` cannot be URL-encoded"
        ))),
    }
}

/// Encode a query parameter name. Names are static, so `encoded` never applies.
pub fn encode_query_name(name: &str) -> Cow<'_, str> {
    utf8_percent_encode(name, QUERY_VALUE).into()
}

fn validate_header_value(name: &str, value: &str) -> RestResult<()> {
    if value.chars().any(|c| c.is_control() && c != '\t') {
        return Err(RestError::Encoding(format!(
            "header `{name}` contains control characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_value_with_slash_is_escaped() {
        let encoded = encode_value("blob", "dir/file.txt", Location::Path, false).unwrap();
        assert_eq!(encoded, "dir%2Ffile.txt");
    }

    #[test]
    fn encoded_path_value_is_verbatim() {
        let encoded = encode_value("blob", "dir/sub%20dir/file", Location::Path, true).unwrap();
        assert_eq!(encoded, "dir/sub%20dir/file");
    }

    #[test]
    fn path_value_escapes_space_and_percent() {
        let encoded = encode_value("name", "a b%c", Location::Path, false).unwrap();
        assert_eq!(encoded, "a%20b%25c");
    }

    #[test]
    fn query_value_escapes_reserved_separators() {
        let encoded = encode_value("filter", "a=b&c+d #e", Location::Query, false).unwrap();
        assert_eq!(encoded, "a%3Db%26c%2Bd%20%23e");
    }

    #[test]
    fn query_value_keeps_slash() {
        let encoded = encode_value("prefix", "logs/2024", Location::Query, false).unwrap();
        assert_eq!(encoded, "logs/2024");
    }

    #[test]
    fn header_value_is_not_percent_encoded() {
        let encoded = encode_value("x-ms-meta-a", "hello world/1", Location::Header, false).unwrap();
        assert_eq!(encoded, "hello world/1");
    }

    #[test]
    fn header_value_with_newline_is_rejected() {
        let err = encode_value("x-ms-client", "a\r\nInjected: 1", Location::Header, false)
            .expect_err("should reject CRLF");
        assert!(matches!(err, RestError::Encoding(_)));
    }

    #[test]
    fn empty_host_value_is_rejected() {
        let err = encode_value("account", "", Location::Host, false).expect_err("empty host");
        assert!(err.to_string().contains("account"));
    }
}
