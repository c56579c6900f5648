//! Binding runtime arguments into a [`RequestTemplate`].

use crate::body::{prepare_body, RequestBody, Serializer};
use crate::encoding::{encode_query_name, encode_value};
use crate::error::{RestError, RestResult};
use crate::template::{Location, ParameterBinding, RequestTemplate};
use crate::transport::{HttpRequest, RequestOptions};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use url::Url;

/// One argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Omitted from query and headers; an error for host and path.
    Null,
    Scalar(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

macro_rules! scalar_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ParamValue {
            fn from(value: $ty) -> Self {
                Self::Scalar(value.to_string())
            }
        })*
    };
}

scalar_from!(&str, String, &String, bool, i32, i64, u16, u32, u64, usize, f64);

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(values: Vec<String>) -> Self {
        Self::List(values)
    }
}

impl From<Vec<&str>> for ParamValue {
    fn from(values: Vec<&str>) -> Self {
        Self::List(values.into_iter().map(str::to_string).collect())
    }
}

impl From<BTreeMap<String, String>> for ParamValue {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self::Map(entries)
    }
}

impl From<HashMap<String, String>> for ParamValue {
    fn from(entries: HashMap<String, String>) -> Self {
        Self::Map(entries.into_iter().collect())
    }
}

/// Named argument values for one call.
#[derive(Debug, Default)]
pub struct Arguments {
    values: HashMap<String, ParamValue>,
    body: Option<RequestBody>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Set the request body.
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Set a structured request body.
    pub fn with_json<T: serde::Serialize>(self, value: &T) -> RestResult<Self> {
        Ok(self.with_body(RequestBody::json(value)?))
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// Set a value only if the caller has not supplied one.
    pub fn set_if_absent(&mut self, name: &str, value: impl Into<ParamValue>) {
        if !self.values.contains_key(name) {
            self.values.insert(name.to_string(), value.into());
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ParamValue> {
        self.values.remove(name)
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn take_body(&mut self) -> Option<RequestBody> {
        self.body.take()
    }

    /// Copy the arguments, unless the body is a one-shot stream.
    pub fn try_clone(&self) -> Option<Self> {
        let body = match &self.body {
            Some(body) => Some(body.try_clone()?),
            None => None,
        };
        Some(Self {
            values: self.values.clone(),
            body,
        })
    }
}

/// Resolve `template` against `args` into a request ready for the transport.
///
/// Every value is encoded exactly once here; the returned request is never
/// encoded again.
///
/// # Errors
///
/// Fails before any network activity with [`RestError::UnresolvedPlaceholder`],
/// [`RestError::MissingArgument`], [`RestError::Encoding`],
/// [`RestError::BodyLength`] or [`RestError::InvalidEndpoint`].
pub fn resolve_request(
    template: &RequestTemplate,
    mut args: Arguments,
    serializer: &dyn Serializer,
    options: RequestOptions,
) -> RestResult<HttpRequest> {
    let host = substitute(template, template.host_template(), &args, Location::Host)?;
    let path = substitute(template, template.path_template(), &args, Location::Path)?;

    let mut url = if host.contains("://") {
        host
    } else {
        format!("https://{host}")
    };
    append_path(&mut url, &path);
    append_query(&mut url, template, &args)?;

    let url = Url::parse(&url).map_err(|e| {
        RestError::invalid_endpoint_with_source(
            format!("cannot build URL for `{}`", template.operation_id()),
            e,
        )
    })?;

    let mut headers = HeaderMap::new();
    for binding in template.bindings_at(Location::Header) {
        apply_header(&mut headers, binding, args.get(binding.name()))?;
    }

    let body = match (template.body_binding(), args.take_body()) {
        (Some(_), Some(body)) => body,
        (Some(_), None) => RequestBody::Empty,
        (None, None | Some(RequestBody::Empty)) => RequestBody::Empty,
        (None, Some(_)) => {
            return Err(RestError::InvalidTemplate(format!(
                "operation `{}` does not take a body",
                template.operation_id()
            )))
        }
    };

    if !matches!(body, RequestBody::Empty) && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, header_value("content-type", template.content_type())?);
    }

    let declared_length = headers
        .get(CONTENT_LENGTH)
        .map(|v| {
            v.to_str()
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .ok_or_else(|| RestError::Encoding("content-length is not a number".into()))
        })
        .transpose()?;

    let body = prepare_body(body, template.content_type(), declared_length, serializer)?;

    tracing::trace!(
        operation = template.operation_id(),
        method = %template.method(),
        url = %url,
        "resolved request"
    );

    Ok(HttpRequest {
        method: template.method().clone(),
        url,
        headers,
        body,
        options,
    })
}

fn substitute(
    template: &RequestTemplate,
    pattern: &str,
    args: &Arguments,
    location: Location,
) -> RestResult<String> {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            rest = "";
            break;
        };
        let name = &after[..close];

        let binding = template
            .bindings_at(location)
            .find(|b| b.name() == name)
            .ok_or_else(|| RestError::UnresolvedPlaceholder {
                placeholder: name.to_string(),
                template: pattern.to_string(),
            })?;

        let value = match args.get(name) {
            Some(ParamValue::Scalar(value)) => value,
            Some(ParamValue::Null) | None => return Err(RestError::MissingArgument(name.to_string())),
            Some(_) => {
                return Err(RestError::Encoding(format!(
                    "`{name}` must be a single value in the {location:?}"
                )))
            }
        };

        out.push_str(&encode_value(name, value, location, binding.is_encoded())?);
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

fn append_path(url: &mut String, path: &str) {
    if path.is_empty() {
        return;
    }
    match (url.ends_with('/'), path.starts_with('/')) {
        (true, true) => url.push_str(&path[1..]),
        (false, false) => {
            url.push('/');
            url.push_str(path);
        }
        _ => url.push_str(path),
    }
}

fn append_query(url: &mut String, template: &RequestTemplate, args: &Arguments) -> RestResult<()> {
    let mut pairs = Vec::new();

    for binding in template.bindings_at(Location::Query) {
        let wire = encode_query_name(binding.serialized_name());

        match args.get(binding.name()) {
            None | Some(ParamValue::Null) => {}
            Some(ParamValue::Scalar(value)) => pairs.push(format!("{wire}={}", encode_query(binding, value)?)),
            Some(ParamValue::List(values)) if binding.is_multi_value() => {
                for value in values {
                    pairs.push(format!("{wire}={}", encode_query(binding, value)?));
                }
            }
            Some(ParamValue::List(values)) => {
                let joined = values
                    .iter()
                    .map(|v| encode_query(binding, v).map(|e| e.into_owned()))
                    .collect::<RestResult<Vec<_>>>()?
                    .join(",");
                pairs.push(format!("{wire}={joined}"));
            }
            Some(ParamValue::Map(_)) => {
                return Err(RestError::Encoding(format!(
                    "query parameter `{}` cannot be a map",
                    binding.name()
                )))
            }
        }
    }

    if !pairs.is_empty() {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&pairs.join("&"));
    }
    Ok(())
}

fn encode_query<'a>(binding: &ParameterBinding, value: &'a str) -> RestResult<Cow<'a, str>> {
    encode_value(binding.name(), value, Location::Query, binding.is_encoded())
}

fn apply_header(
    headers: &mut HeaderMap,
    binding: &ParameterBinding,
    value: Option<&ParamValue>,
) -> RestResult<()> {
    let name = binding.serialized_name();

    match (value, binding.header_prefix()) {
        (None | Some(ParamValue::Null), _) => {}
        (Some(ParamValue::Map(entries)), Some(prefix)) => {
            for (key, value) in entries {
                let header = format!("{prefix}{key}");
                encode_value(&header, value, Location::Header, binding.is_encoded())?;
                headers.insert(header_name(&header)?, header_value(&header, value)?);
            }
        }
        (Some(ParamValue::Scalar(value)), None) => {
            encode_value(name, value, Location::Header, binding.is_encoded())?;
            headers.insert(header_name(name)?, header_value(name, value)?);
        }
        (Some(ParamValue::List(values)), None) => {
            let joined = values.join(",");
            encode_value(name, &joined, Location::Header, binding.is_encoded())?;
            headers.insert(header_name(name)?, header_value(name, &joined)?);
        }
        (Some(_), Some(_)) => {
            return Err(RestError::Encoding(format!(
                "header map `{}` requires a map value",
                binding.name()
            )))
        }
        (Some(ParamValue::Map(_)), None) => {
            return Err(RestError::Encoding(format!(
                "header `{name}` cannot be a map without a prefix"
            )))
        }
    }
    Ok(())
}

fn header_name(name: &str) -> RestResult<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| RestError::Encoding(format!("`{name}` is not a valid header name")))
}

fn header_value(name: &str, value: &str) -> RestResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| RestError::Encoding(format!("header `{name}` has an invalid value")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{HttpBody, JsonSerializer};
    use crate::template::ParameterBinding;
    use bytes::Bytes;
    use reqwest::Method;

    fn resolve(template: &RequestTemplate, args: Arguments) -> RestResult<HttpRequest> {
        resolve_request(template, args, &JsonSerializer, RequestOptions::default())
    }

    fn blob_template() -> RequestTemplate {
        RequestTemplate::builder("Blobs_Get", Method::GET)
            .host("{endpoint}")
            .path("/{container}/{blob}")
            .binding(ParameterBinding::host("endpoint").encoded())
            .binding(ParameterBinding::path("container"))
            .binding(ParameterBinding::path("blob"))
            .binding(ParameterBinding::query("snapshot"))
            .binding(ParameterBinding::query("timeout"))
            .build()
            .unwrap()
    }

    fn blob_args(blob: &str) -> Arguments {
        Arguments::new()
            .with("endpoint", "https://acct.blob.core.windows.net")
            .with("container", "logs")
            .with("blob", blob)
    }

    #[test]
    fn slash_in_path_value_is_escaped() {
        let request = resolve(&blob_template(), blob_args("2024/01/app.log")).unwrap();
        assert_eq!(
            request.url.as_str(),
            "https://acct.blob.core.windows.net/logs/2024%2F01%2Fapp.log"
        );
        assert_eq!(request.url.path_segments().unwrap().count(), 2);
    }

    #[test]
    fn encoded_path_value_is_verbatim() {
        let template = RequestTemplate::builder("Blobs_Get", Method::GET)
            .host("{endpoint}")
            .path("/{container}/{blob}")
            .binding(ParameterBinding::host("endpoint").encoded())
            .binding(ParameterBinding::path("container"))
            .binding(ParameterBinding::path("blob").encoded())
            .build()
            .unwrap();

        let request = resolve(&template, blob_args("2024/01/app.log")).unwrap();
        assert_eq!(
            request.url.as_str(),
            "https://acct.blob.core.windows.net/logs/2024/01/app.log"
        );
    }

    #[test]
    fn null_query_value_is_omitted() {
        let args = blob_args("a.txt")
            .with("snapshot", Option::<String>::None)
            .with("timeout", 30);
        let request = resolve(&blob_template(), args).unwrap();

        assert_eq!(request.url.query(), Some("timeout=30"));
        assert!(!request.url.as_str().contains("snapshot"));
    }

    #[test]
    fn absent_query_arguments_leave_no_query_string() {
        let request = resolve(&blob_template(), blob_args("a.txt")).unwrap();
        assert_eq!(request.url.query(), None);
    }

    #[test]
    fn multi_value_query_repeats_each_encoded_value() {
        let template = RequestTemplate::builder("List", Method::GET)
            .host("{endpoint}")
            .path("/items")
            .binding(ParameterBinding::host("endpoint").encoded())
            .binding(ParameterBinding::query("select").wire_name("$select").multi_value())
            .build()
            .unwrap();

        let args = Arguments::new()
            .with("endpoint", "https://svc.example.com")
            .with("select", vec!["a b", "c&d", "e"]);
        let request = resolve(&template, args).unwrap();

        assert_eq!(
            request.url.query(),
            Some("$select=a%20b&$select=c%26d&$select=e")
        );
    }

    #[test]
    fn single_value_list_query_is_comma_joined() {
        let template = RequestTemplate::builder("List", Method::GET)
            .host("{endpoint}")
            .binding(ParameterBinding::host("endpoint").encoded())
            .binding(ParameterBinding::query("include"))
            .build()
            .unwrap();

        let args = Arguments::new()
            .with("endpoint", "https://svc.example.com")
            .with("include", vec!["metadata", "snapshots"]);
        let request = resolve(&template, args).unwrap();
        assert_eq!(request.url.query(), Some("include=metadata,snapshots"));
    }

    #[test]
    fn header_map_expands_with_prefix() {
        let template = RequestTemplate::builder("Blobs_SetMetadata", Method::PUT)
            .host("{endpoint}")
            .binding(ParameterBinding::host("endpoint").encoded())
            .binding(ParameterBinding::header_map("metadata", "x-ms-meta-"))
            .binding(ParameterBinding::header("version").wire_name("x-ms-version"))
            .build()
            .unwrap();

        let mut metadata = BTreeMap::new();
        metadata.insert("a".to_string(), "1".to_string());
        metadata.insert("b".to_string(), "2".to_string());

        let args = Arguments::new()
            .with("endpoint", "https://acct.blob.core.windows.net")
            .with("metadata", metadata)
            .with("version", "2024-08-04");
        let request = resolve(&template, args).unwrap();

        assert_eq!(request.headers.get("x-ms-meta-a").unwrap(), "1");
        assert_eq!(request.headers.get("x-ms-meta-b").unwrap(), "2");
        let meta_headers = request
            .headers
            .keys()
            .filter(|k| k.as_str().starts_with("x-ms-meta-"))
            .count();
        assert_eq!(meta_headers, 2);
        assert_eq!(request.headers.get("x-ms-version").unwrap(), "2024-08-04");
    }

    #[test]
    fn multi_segment_host_is_concatenated() {
        let template = RequestTemplate::builder("Get", Method::GET)
            .host("{account}.{dnsSuffix}")
            .path("/status")
            .binding(ParameterBinding::host("account"))
            .binding(ParameterBinding::host("dnsSuffix"))
            .build()
            .unwrap();

        let args = Arguments::new()
            .with("account", "myacct")
            .with("dnsSuffix", "queue.core.windows.net");
        let request = resolve(&template, args).unwrap();
        assert_eq!(request.url.as_str(), "https://myacct.queue.core.windows.net/status");
    }

    #[test]
    fn missing_path_argument_fails_before_dispatch() {
        let args = Arguments::new()
            .with("endpoint", "https://acct.blob.core.windows.net")
            .with("container", "logs");
        let err = resolve(&blob_template(), args).expect_err("blob missing");
        match err {
            RestError::MissingArgument(name) => assert_eq!(name, "blob"),
            other => panic!("Expected MissingArgument, got {other:?}"),
        }
    }

    #[test]
    fn header_injection_is_rejected() {
        let template = RequestTemplate::builder("Get", Method::GET)
            .host("{endpoint}")
            .binding(ParameterBinding::host("endpoint").encoded())
            .binding(ParameterBinding::header("requestId").wire_name("x-ms-client-request-id"))
            .build()
            .unwrap();

        let args = Arguments::new()
            .with("endpoint", "https://svc.example.com")
            .with("requestId", "abc\r\nx-evil: 1");
        assert!(matches!(resolve(&template, args), Err(RestError::Encoding(_))));
    }

    #[test]
    fn json_body_gets_declared_content_type() {
        let template = RequestTemplate::builder("Create", Method::POST)
            .host("{endpoint}")
            .path("/indexes")
            .binding(ParameterBinding::host("endpoint").encoded())
            .binding(ParameterBinding::body("index"))
            .build()
            .unwrap();

        let args = Arguments::new()
            .with("endpoint", "https://svc.example.com")
            .with_json(&serde_json::json!({"name": "hotels"}))
            .unwrap();
        let request = resolve(&template, args).unwrap();

        assert_eq!(request.headers.get(CONTENT_TYPE).unwrap(), "application/json");
        match request.body {
            HttpBody::Buffered(bytes) => assert_eq!(&bytes[..], br#"{"name":"hotels"}"#),
            other => panic!("Expected buffered body, got {other:?}"),
        }
    }

    #[test]
    fn declared_content_length_is_checked_against_body() {
        let template = RequestTemplate::builder("Upload", Method::PUT)
            .host("{endpoint}")
            .binding(ParameterBinding::host("endpoint").encoded())
            .binding(ParameterBinding::header("contentLength").wire_name("content-length"))
            .binding(ParameterBinding::body("data"))
            .content_type("application/octet-stream")
            .build()
            .unwrap();

        let args = Arguments::new()
            .with("endpoint", "https://svc.example.com")
            .with("contentLength", 10u64)
            .with_body(RequestBody::Bytes(Bytes::from_static(b"short")));
        let err = resolve(&template, args).expect_err("length mismatch");
        assert!(err.to_string().contains("less than"), "error: {err}");
    }

    #[test]
    fn body_for_bodiless_operation_is_rejected() {
        let args = blob_args("a").with_body(RequestBody::Bytes(Bytes::from_static(b"x")));
        assert!(matches!(
            resolve(&blob_template(), args),
            Err(RestError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn arguments_with_stream_body_cannot_be_cloned() {
        let args = Arguments::new().with_body(RequestBody::stream(futures::stream::empty()));
        assert!(args.try_clone().is_none());
        assert!(Arguments::new().with("a", 1).try_clone().is_some());
    }
}
