//! The boundary between the engine and the network.
//!
//! The engine only needs [`Transport::send`]. The default implementation,
//! [`ReqwestTransport`], delegates connection pooling, TLS and timeouts to
//! `reqwest`. Transport failures are returned unchanged as
//! [`RestError::Request`], except body-length failures raised by the engine's
//! own validating stream, which surface as [`RestError::BodyLength`].

use crate::body::{find_length_error, HttpBody};
use crate::error::{RestError, RestResult};
use crate::response::HttpResponse;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::HeaderMap;
use reqwest::Method;
use std::fmt;
use std::io;
use std::time::Duration;
use url::Url;

/// Per-call options, scoped to a single exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Timeout for this exchange only. Falls back to the client's read timeout.
    pub timeout: Option<Duration>,
    /// Read the whole response body into memory before returning.
    pub buffer_response: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn buffer_response(mut self, buffer: bool) -> Self {
        self.buffer_response = buffer;
        self
    }
}

/// A fully resolved request.
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: HttpBody,
    pub options: RequestOptions,
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("options", &self.options)
            .finish()
    }
}

/// Sends resolved requests.
///
/// Implementations must not block the calling thread; the blocking client
/// drives them on its own runtime.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn send(&self, request: HttpRequest) -> RestResult<HttpResponse>;
}

/// [`Transport`] backed by a `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> RestResult<HttpResponse> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
            options,
        } = request;

        let mut builder = self.http.request(method, url).headers(headers);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match body {
            HttpBody::Empty => builder,
            HttpBody::Buffered(bytes) => builder.body(bytes),
            HttpBody::Stream(stream) => builder.body(reqwest::Body::wrap_stream(stream)),
        };

        let response = builder.send().await.map_err(|e| match find_length_error(&e) {
            Some(length) => RestError::BodyLength(length),
            None => RestError::Request(e),
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let stream = response.bytes_stream().map_err(io::Error::other).boxed();

        let mut response = HttpResponse::new(status, headers, stream);
        if options.buffer_response {
            response.buffer().await?;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyStream;
    use bytes::Bytes;
    use futures::stream;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(method: Method, url: &str, body: HttpBody) -> HttpRequest {
        HttpRequest {
            method,
            url: Url::parse(url).unwrap(),
            headers: HeaderMap::new(),
            body,
            options: RequestOptions::default(),
        }
    }

    #[tokio::test]
    async fn sends_buffered_body_and_reads_lazily() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/blob"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::default();
        let mut response = transport
            .send(request(
                Method::PUT,
                &format!("{}/blob", server.uri()),
                HttpBody::Buffered(Bytes::from_static(b"payload")),
            ))
            .await
            .expect("should succeed");

        assert_eq!(response.status(), 201);
        assert!(!response.is_buffered());
        assert_eq!(response.text().await.unwrap(), "created");
    }

    #[tokio::test]
    async fn sends_streamed_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload"))
            .and(body_string("chunked"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"chun")),
            Ok(Bytes::from_static(b"ked")),
        ];
        let stream: BodyStream = stream::iter(chunks).boxed();

        let transport = ReqwestTransport::default();
        let response = transport
            .send(request(
                Method::POST,
                &format!("{}/upload", server.uri()),
                HttpBody::Stream(stream),
            ))
            .await
            .expect("should succeed");

        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn buffer_option_reads_body_eagerly() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/doc"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let mut req = request(Method::GET, &format!("{}/doc", server.uri()), HttpBody::Empty);
        req.headers.insert("accept", "application/json".parse().unwrap());
        req.options = RequestOptions::new().buffer_response(true);

        let mut response = ReqwestTransport::default().send(req).await.unwrap();
        assert!(response.is_buffered());
        assert_eq!(response.text().await.unwrap(), "{}");
        assert_eq!(response.text().await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn connection_failure_is_propagated_unchanged() {
        let transport = ReqwestTransport::default();
        let err = transport
            .send(request(Method::GET, "http://127.0.0.1:1/unreachable", HttpBody::Empty))
            .await
            .expect_err("nothing listens on port 1");

        assert!(matches!(err, RestError::Request(_)), "got {err:?}");
    }
}
