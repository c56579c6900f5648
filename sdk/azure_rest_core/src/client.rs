//! The asynchronous client that executes declared operations.
//!
//! [`RestClient`] owns the transport, the serializer and the service-wide
//! settings (endpoint and api-version). Each call resolves a
//! [`RequestTemplate`] with caller [`Arguments`], sends it, and decodes the
//! response per the template's [`ReturnShape`].
//!
//! # Example
//!
//! ```rust,no_run
//! use azure_rest_core::client::RestClient;
//! use azure_rest_core::resolve::Arguments;
//! use azure_rest_core::template::{ParameterBinding, RequestTemplate, ReturnShape};
//! use reqwest::Method;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RestClient::builder()
//!     .endpoint("https://my-service.search.windows.net")
//!     .api_version("2024-07-01")
//!     .build()?;
//!
//! let exists = RequestTemplate::builder("Indexes_Exists", Method::GET)
//!     .host("{endpoint}")
//!     .path("/indexes('{indexName}')")
//!     .binding(ParameterBinding::host("endpoint").encoded())
//!     .binding(ParameterBinding::path("indexName"))
//!     .binding(ParameterBinding::query("api-version"))
//!     .returns(ReturnShape::BooleanFromStatus)
//!     .build()?;
//!
//! let found = client
//!     .send_exists(&exists, Arguments::new().with("indexName", "hotels"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::body::{JsonSerializer, RequestBody, Serializer};
use crate::decode::{decode_response, Decoded};
use crate::error::{RestError, RestResult};
use crate::paging::{ContinuationToken, Page, PagedStream};
use crate::resolve::{resolve_request, Arguments, ParamValue};
use crate::response::{HttpResponse, Response};
use crate::template::{ContinuationMode, Location, PageSpec, RequestTemplate, ReturnShape};
use crate::transport::{HttpRequest, ReqwestTransport, RequestOptions, Transport};
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Default API version sent when a template binds `api-version`.
pub const DEFAULT_API_VERSION: &str = "2024-07-01";

/// Default connection timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read/response timeout (60 seconds).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable consulted when no endpoint is configured.
pub const ENDPOINT_ENV_VAR: &str = "AZURE_REST_ENDPOINT";

/// Host binding filled from the client's endpoint when the caller omits it.
pub const ENDPOINT_ARGUMENT: &str = "endpoint";

/// Query binding filled from the client's api-version when the caller omits it.
pub const API_VERSION_ARGUMENT: &str = "api-version";

/// Executes [`RequestTemplate`]s against a service.
///
/// The client is cheaply cloneable and can be shared across threads.
#[derive(Debug, Clone)]
pub struct RestClient {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) serializer: Arc<dyn Serializer>,
    pub(crate) endpoint: Url,
    pub(crate) api_version: String,
}

/// Builder for constructing a [`RestClient`].
///
/// Use [`RestClient::builder()`] to create a new builder.
#[derive(Debug, Default)]
pub struct RestClientBuilder {
    endpoint: Option<String>,
    api_version: Option<String>,
    http_client: Option<HttpClient>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    transport: Option<Arc<dyn Transport>>,
    serializer: Option<Arc<dyn Serializer>>,
}

impl RestClient {
    /// Create a new builder for configuring a `RestClient`.
    pub fn builder() -> RestClientBuilder {
        RestClientBuilder::default()
    }

    /// Get the base endpoint URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Get the API version being used.
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn serializer(&self) -> &dyn Serializer {
        self.serializer.as_ref()
    }

    /// Resolve `template` into a request without sending it.
    ///
    /// `endpoint` and `api-version` are filled from the client's settings
    /// when the template binds them and the caller did not.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument is missing, a value cannot be encoded,
    /// or the body cannot be serialized.
    pub fn resolve(
        &self,
        template: &RequestTemplate,
        mut args: Arguments,
        options: RequestOptions,
    ) -> RestResult<HttpRequest> {
        if template
            .bindings_at(Location::Host)
            .any(|b| b.name() == ENDPOINT_ARGUMENT)
        {
            args.set_if_absent(
                ENDPOINT_ARGUMENT,
                self.endpoint.as_str().trim_end_matches('/'),
            );
        }
        if template
            .bindings_at(Location::Query)
            .any(|b| b.name() == API_VERSION_ARGUMENT)
        {
            args.set_if_absent(API_VERSION_ARGUMENT, self.api_version.as_str());
        }
        resolve_request(template, args, self.serializer.as_ref(), options)
    }

    /// Resolve, send and decode one operation.
    ///
    /// # Errors
    ///
    /// Returns resolution errors before anything is sent, transport errors
    /// unchanged, and the mapped exception for an unexpected status.
    #[tracing::instrument(
        name = "azure_rest::client::invoke",
        skip(self, template, args, options),
        fields(operation = %template.operation_id())
    )]
    pub async fn invoke(
        &self,
        template: &RequestTemplate,
        args: Arguments,
        options: RequestOptions,
    ) -> RestResult<Decoded> {
        let request = self.resolve(template, args, options)?;
        tracing::debug!(method = %request.method, url = %request.url, "sending request");

        let response = self.transport.send(request).await?;
        tracing::debug!(status = response.status(), "received response");

        decode_response(template, response, self.serializer.as_ref()).await
    }

    /// Send an operation declared with [`ReturnShape::Void`].
    pub async fn send_void(&self, template: &RequestTemplate, args: Arguments) -> RestResult<()> {
        expect_shape(template, "void", |s| matches!(s, ReturnShape::Void))?;
        self.invoke(template, args, RequestOptions::default()).await?;
        Ok(())
    }

    /// Send an operation declared with [`ReturnShape::BooleanFromStatus`].
    pub async fn send_exists(&self, template: &RequestTemplate, args: Arguments) -> RestResult<bool> {
        expect_shape(template, "boolean-from-status", |s| {
            matches!(s, ReturnShape::BooleanFromStatus)
        })?;
        match strip_wrapper(self.invoke(template, args, RequestOptions::default()).await?) {
            Decoded::Boolean(exists) => Ok(exists),
            _ => Err(shape_mismatch(template, "boolean-from-status")),
        }
    }

    /// Send an operation declared with [`ReturnShape::Bytes`].
    pub async fn send_bytes(&self, template: &RequestTemplate, args: Arguments) -> RestResult<Bytes> {
        expect_shape(template, "bytes", |s| matches!(s, ReturnShape::Bytes))?;
        match strip_wrapper(self.invoke(template, args, RequestOptions::default()).await?) {
            Decoded::Bytes(bytes) => Ok(bytes),
            _ => Err(shape_mismatch(template, "bytes")),
        }
    }

    /// Send an operation declared with [`ReturnShape::DeserializedBody`] and
    /// deserialize the body into `T`.
    ///
    /// An empty body decodes as `null`, which fails for non-nullable `T`.
    /// Callers that want `T::default()` there use
    /// [`send_scalar`](Self::send_scalar).
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        template: &RequestTemplate,
        args: Arguments,
    ) -> RestResult<T> {
        expect_shape(template, "deserialized-body", |s| {
            matches!(s, ReturnShape::DeserializedBody)
        })?;
        match strip_wrapper(self.invoke(template, args, RequestOptions::default()).await?) {
            Decoded::Value(value) => Ok(serde_json::from_value(value)?),
            _ => Err(shape_mismatch(template, "deserialized-body")),
        }
    }

    /// Like [`send_json`](Self::send_json), but an empty body yields
    /// `T::default()`.
    ///
    /// Meant for scalar results such as counts.
    pub async fn send_scalar<T: DeserializeOwned + Default>(
        &self,
        template: &RequestTemplate,
        args: Arguments,
    ) -> RestResult<T> {
        expect_shape(template, "deserialized-body", |s| {
            matches!(s, ReturnShape::DeserializedBody)
        })?;
        match strip_wrapper(self.invoke(template, args, RequestOptions::default()).await?) {
            Decoded::Value(serde_json::Value::Null) => Ok(T::default()),
            Decoded::Value(value) => Ok(serde_json::from_value(value)?),
            _ => Err(shape_mismatch(template, "deserialized-body")),
        }
    }

    /// Send an operation declared with [`ReturnShape::ResponseWrapper`] and
    /// return the value together with status and headers.
    ///
    /// Void bodies deserialize from `null`, so `T = ()` works for them. An
    /// empty body is an error for non-nullable `T`; use
    /// [`send_scalar_with_response`](Self::send_scalar_with_response) to get
    /// `T::default()` instead.
    pub async fn send_with_response<T: DeserializeOwned>(
        &self,
        template: &RequestTemplate,
        args: Arguments,
    ) -> RestResult<Response<T>> {
        let (status, headers, value) = self.send_wrapped(template, args).await?;
        Ok(Response {
            status,
            headers,
            value: serde_json::from_value(value)?,
        })
    }

    /// Like [`send_with_response`](Self::send_with_response), but an empty
    /// body yields `T::default()`.
    pub async fn send_scalar_with_response<T: DeserializeOwned + Default>(
        &self,
        template: &RequestTemplate,
        args: Arguments,
    ) -> RestResult<Response<T>> {
        let (status, headers, value) = self.send_wrapped(template, args).await?;
        let value = match value {
            serde_json::Value::Null => T::default(),
            value => serde_json::from_value(value)?,
        };
        Ok(Response {
            status,
            headers,
            value,
        })
    }

    async fn send_wrapped(
        &self,
        template: &RequestTemplate,
        args: Arguments,
    ) -> RestResult<(u16, HeaderMap, serde_json::Value)> {
        expect_shape(template, "response-wrapper", |s| {
            matches!(s, ReturnShape::ResponseWrapper(_))
        })?;
        match self.invoke(template, args, RequestOptions::default()).await? {
            Decoded::Wrapped {
                status,
                headers,
                value,
            } => {
                let value = match *value {
                    Decoded::Void => serde_json::Value::Null,
                    Decoded::Boolean(b) => serde_json::Value::Bool(b),
                    Decoded::Value(v) => v,
                    _ => return Err(shape_mismatch(template, "response-wrapper")),
                };
                Ok((status, headers, value))
            }
            _ => Err(shape_mismatch(template, "response-wrapper")),
        }
    }

    /// Send an operation declared with [`ReturnShape::Stream`].
    ///
    /// The returned response's body has not been read.
    pub async fn send_stream(
        &self,
        template: &RequestTemplate,
        args: Arguments,
        options: RequestOptions,
    ) -> RestResult<HttpResponse> {
        expect_shape(template, "stream", |s| matches!(s, ReturnShape::Stream))?;
        match strip_wrapper(self.invoke(template, args, options).await?) {
            Decoded::Stream(response) => Ok(response),
            _ => Err(shape_mismatch(template, "stream")),
        }
    }

    /// Iterate a [`ReturnShape::Paged`] operation from its first page.
    ///
    /// Nothing is sent until the stream is polled.
    ///
    /// # Errors
    ///
    /// Returns an error if the template is not paged or the arguments carry a
    /// body that cannot be replayed for later pages.
    pub fn list_pages<T: DeserializeOwned + Send + 'static>(
        &self,
        template: Arc<RequestTemplate>,
        args: Arguments,
        options: RequestOptions,
    ) -> RestResult<PagedStream<T>> {
        let retriever = self.page_retriever(template, args, options)?;
        Ok(PagedStream::new(retriever))
    }

    /// Continue a paged operation from a previously issued token.
    ///
    /// # Errors
    ///
    /// As [`list_pages`](Self::list_pages); a token issued for another
    /// api-version fails with [`RestError::ProtocolVersionMismatch`] without
    /// any request being sent.
    pub fn list_pages_from<T: DeserializeOwned + Send + 'static>(
        &self,
        template: Arc<RequestTemplate>,
        args: Arguments,
        token: ContinuationToken,
        options: RequestOptions,
    ) -> RestResult<PagedStream<T>> {
        self.check_version(&token)?;
        let retriever = self.page_retriever(template, args, options)?;
        Ok(PagedStream::resume(retriever, token))
    }

    fn page_retriever<T: DeserializeOwned + Send + 'static>(
        &self,
        template: Arc<RequestTemplate>,
        args: Arguments,
        options: RequestOptions,
    ) -> RestResult<
        impl Fn(
                Option<ContinuationToken>,
            ) -> futures::future::BoxFuture<'static, RestResult<Page<T>>>
            + Send
            + Sync
            + 'static,
    > {
        expect_shape(&template, "paged", |s| matches!(s, ReturnShape::Paged(_)))?;
        if args.try_clone().is_none() {
            return Err(RestError::InvalidTemplate(format!(
                "operation `{}` is paged but its body is a one-shot stream",
                template.operation_id()
            )));
        }

        // One-shot body streams are Send but not Sync.
        let args = Mutex::new(args);
        let client = self.clone();
        Ok(move |token: Option<ContinuationToken>| {
            let client = client.clone();
            let template = Arc::clone(&template);
            let args = args.lock().ok().and_then(|args| args.try_clone());
            let fut: futures::future::BoxFuture<'static, RestResult<Page<T>>> =
                Box::pin(async move {
                    let args = args.ok_or(RestError::BodyConsumed)?;
                    client.fetch_page(&template, args, token, options).await
                });
            fut
        })
    }

    fn check_version(&self, token: &ContinuationToken) -> RestResult<()> {
        if token.protocol_version() != self.api_version {
            return Err(RestError::ProtocolVersionMismatch {
                expected: self.api_version.clone(),
                actual: token.protocol_version().to_string(),
            });
        }
        Ok(())
    }

    #[tracing::instrument(
        name = "azure_rest::client::fetch_page",
        skip(self, template, args, token, options),
        fields(operation = %template.operation_id(), continued = token.is_some())
    )]
    async fn fetch_page<T: DeserializeOwned>(
        &self,
        template: &RequestTemplate,
        args: Arguments,
        token: Option<ContinuationToken>,
        options: RequestOptions,
    ) -> RestResult<Page<T>> {
        let ReturnShape::Paged(spec) = template.return_shape().innermost() else {
            return Err(shape_mismatch(template, "paged"));
        };

        let request = match &token {
            None => self.resolve(template, args, options)?,
            Some(token) => {
                self.check_version(token)?;
                self.continuation_request(template, spec, args, token, options)?
            }
        };

        let response = self.transport.send(request).await?;
        let page = match strip_wrapper(decode_response(template, response, self.serializer.as_ref()).await?) {
            Decoded::Page(page) => page,
            _ => return Err(shape_mismatch(template, "paged")),
        };

        let elements = page
            .items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()?;
        let continuation_token = page
            .next
            .map(|next| ContinuationToken::new(next, self.api_version.clone()));

        tracing::debug!(
            elements = elements.len(),
            has_next = continuation_token.is_some(),
            "page decoded"
        );
        Ok(Page {
            elements,
            continuation_token,
        })
    }

    fn continuation_request(
        &self,
        template: &RequestTemplate,
        spec: &PageSpec,
        mut args: Arguments,
        token: &ContinuationToken,
        options: RequestOptions,
    ) -> RestResult<HttpRequest> {
        let params = token.next_page_parameters();
        match spec.continuation {
            ContinuationMode::Query => {
                let serde_json::Value::Object(fields) = params else {
                    return Err(RestError::InvalidContinuationToken(format!(
                        "query continuation expects an object, got {params}"
                    )));
                };
                for binding in template.bindings_at(Location::Query) {
                    if binding.name() != API_VERSION_ARGUMENT {
                        args.remove(binding.name());
                    }
                }
                for (key, value) in fields {
                    let key = key.as_str();
                    let binding = template
                        .bindings_at(Location::Query)
                        .find(|b| b.serialized_name() == key || b.name() == key)
                        .ok_or_else(|| {
                            RestError::InvalidContinuationToken(format!(
                                "`{key}` is not a query parameter of `{}`",
                                template.operation_id()
                            ))
                        })?;
                    args.set(binding.name(), json_to_param(key, value)?);
                }
                self.resolve(template, args, options)
            }
            ContinuationMode::Body => {
                let args = args.with_body(RequestBody::Json(params.clone()));
                self.resolve(template, args, options)
            }
            ContinuationMode::NextLink => {
                let link = params.as_str().ok_or_else(|| {
                    RestError::InvalidContinuationToken(format!(
                        "next link must be a string, got {params}"
                    ))
                })?;
                let mut request = self.resolve(template, args, options)?;
                let mut url = request.url.join(link).map_err(|e| {
                    RestError::invalid_endpoint_with_source("invalid next link", e)
                })?;
                let has_version = url.query_pairs().any(|(k, _)| k == API_VERSION_ARGUMENT);
                if !has_version
                    && template
                        .bindings_at(Location::Query)
                        .any(|b| b.name() == API_VERSION_ARGUMENT)
                {
                    url.query_pairs_mut()
                        .append_pair(API_VERSION_ARGUMENT, &self.api_version);
                }
                request.url = url;
                Ok(request)
            }
        }
    }
}

fn json_to_param(key: &str, value: &serde_json::Value) -> RestResult<ParamValue> {
    Ok(match value {
        serde_json::Value::Null => ParamValue::Null,
        serde_json::Value::String(s) => ParamValue::Scalar(s.clone()),
        serde_json::Value::Bool(_) | serde_json::Value::Number(_) => {
            ParamValue::Scalar(value.to_string())
        }
        serde_json::Value::Array(items) => ParamValue::List(
            items
                .iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        ),
        serde_json::Value::Object(_) => {
            return Err(RestError::InvalidContinuationToken(format!(
                "query parameter `{key}` cannot be an object"
            )))
        }
    })
}

/// Drop a response wrapper the caller did not ask for.
fn strip_wrapper(decoded: Decoded) -> Decoded {
    match decoded {
        Decoded::Wrapped { value, .. } => strip_wrapper(*value),
        other => other,
    }
}

fn expect_shape(
    template: &RequestTemplate,
    requested: &'static str,
    accepts: impl Fn(&ReturnShape) -> bool,
) -> RestResult<()> {
    let shape = match template.return_shape() {
        wrapper @ ReturnShape::ResponseWrapper(_) if requested == "response-wrapper" => wrapper,
        other => other.innermost(),
    };
    if accepts(shape) {
        Ok(())
    } else {
        Err(shape_mismatch(template, requested))
    }
}

fn shape_mismatch(template: &RequestTemplate, requested: &'static str) -> RestError {
    RestError::ReturnShapeMismatch {
        operation: template.operation_id().to_string(),
        declared: template.return_shape().name(),
        requested,
    }
}

impl RestClientBuilder {
    /// Set the service endpoint URL.
    ///
    /// If not set, the builder will check the `AZURE_REST_ENDPOINT`
    /// environment variable.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the API version.
    ///
    /// Defaults to [`DEFAULT_API_VERSION`].
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Set a custom HTTP client for the default transport.
    ///
    /// **Note:** If you provide a custom HTTP client, any timeout configuration
    /// via [`connect_timeout`](Self::connect_timeout) or
    /// [`read_timeout`](Self::read_timeout) will be ignored.
    pub fn http_client(mut self, client: HttpClient) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Set the connection timeout.
    ///
    /// **Note:** This setting is ignored if a custom HTTP client or transport
    /// is provided.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the read timeout.
    ///
    /// It covers the entire request/response cycle including reading the body.
    /// [`RequestOptions::timeout`] overrides it for a single call.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Replace the HTTP transport entirely.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the JSON serializer used for bodies.
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Build the `RestClient`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No endpoint is provided and `AZURE_REST_ENDPOINT` is not set
    /// - The endpoint URL is invalid
    /// - The HTTP client cannot be constructed
    pub fn build(self) -> RestResult<RestClient> {
        let transport: Arc<dyn Transport> = match (self.transport, self.http_client) {
            (Some(transport), _) => transport,
            (None, Some(http)) => Arc::new(ReqwestTransport::new(http)),
            (None, None) => {
                let http = reqwest::Client::builder()
                    .connect_timeout(self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
                    .timeout(self.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT))
                    .build()?;
                Arc::new(ReqwestTransport::new(http))
            }
        };

        let endpoint_str = self
            .endpoint
            .or_else(|| std::env::var(ENDPOINT_ENV_VAR).ok())
            .ok_or_else(|| {
                RestError::MissingConfig(format!(
                    "endpoint is required. Set it via builder or {ENDPOINT_ENV_VAR} env var."
                ))
            })?;

        let endpoint = Url::parse(&endpoint_str)
            .map_err(|e| RestError::invalid_endpoint_with_source("invalid endpoint URL", e))?;
        if endpoint.cannot_be_a_base() {
            return Err(RestError::invalid_endpoint(format!(
                "endpoint `{endpoint_str}` is not an absolute http(s) URL"
            )));
        }

        Ok(RestClient {
            transport,
            serializer: self
                .serializer
                .unwrap_or_else(|| Arc::new(JsonSerializer)),
            endpoint,
            api_version: self
                .api_version
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
        })
    }
}
