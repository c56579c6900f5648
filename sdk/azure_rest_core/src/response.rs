//! HTTP responses with a lazy, single-consumption body.
//!
//! The body of a fresh [`HttpResponse`] is read from the connection only
//! when one of the accessors asks for it, and only once. Calling
//! [`HttpResponse::buffer`] copies it into memory; after that every accessor
//! returns the same bytes again without touching the network.

use crate::body::BodyStream;
use crate::error::{RestError, RestResult};
use bytes::Bytes;
use futures::{stream, StreamExt};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use std::fmt;

enum BodyState {
    Lazy(BodyStream),
    Buffered(Bytes),
    Released,
}

/// A response as returned by a [`Transport`](crate::transport::Transport).
pub struct HttpResponse {
    status: u16,
    headers: HeaderMap,
    body: BodyState,
}

impl HttpResponse {
    /// A response whose body is still on the connection.
    pub fn new(status: u16, headers: HeaderMap, body: BodyStream) -> Self {
        Self {
            status,
            headers,
            body: BodyState::Lazy(body),
        }
    }

    /// A response whose body is already in memory.
    pub fn from_bytes(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: BodyState::Buffered(body.into()),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A header value as a string, if present and valid UTF-8.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.body, BodyState::Buffered(_))
    }

    /// Read the body into memory so it can be accessed repeatedly.
    ///
    /// Buffering an already-buffered response does nothing.
    pub async fn buffer(&mut self) -> RestResult<()> {
        match std::mem::replace(&mut self.body, BodyState::Released) {
            BodyState::Lazy(stream) => {
                let bytes = read_all(stream).await?;
                self.body = BodyState::Buffered(bytes);
                Ok(())
            }
            BodyState::Buffered(bytes) => {
                self.body = BodyState::Buffered(bytes);
                Ok(())
            }
            BodyState::Released => Err(RestError::BodyConsumed),
        }
    }

    /// The whole body.
    ///
    /// An unbuffered body is consumed by this call.
    pub async fn bytes(&mut self) -> RestResult<Bytes> {
        match std::mem::replace(&mut self.body, BodyState::Released) {
            BodyState::Lazy(stream) => read_all(stream).await,
            BodyState::Buffered(bytes) => {
                self.body = BodyState::Buffered(bytes.clone());
                Ok(bytes)
            }
            BodyState::Released => Err(RestError::BodyConsumed),
        }
    }

    /// The body decoded as UTF-8, replacing invalid sequences.
    pub async fn text(&mut self) -> RestResult<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// The body deserialized from JSON.
    pub async fn json<T: DeserializeOwned>(&mut self) -> RestResult<T> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The body as a stream of chunks.
    ///
    /// A buffered body yields its bytes as one chunk and stays available.
    pub fn body_stream(&mut self) -> RestResult<BodyStream> {
        match std::mem::replace(&mut self.body, BodyState::Released) {
            BodyState::Lazy(stream) => Ok(stream),
            BodyState::Buffered(bytes) => {
                self.body = BodyState::Buffered(bytes.clone());
                Ok(stream::once(async move { Ok::<Bytes, std::io::Error>(bytes) }).boxed())
            }
            BodyState::Released => Err(RestError::BodyConsumed),
        }
    }

    /// Read and discard the body.
    pub async fn drain(&mut self) -> RestResult<()> {
        if let BodyState::Lazy(stream) = std::mem::replace(&mut self.body, BodyState::Released) {
            read_all(stream).await?;
        }
        Ok(())
    }

    /// Drop an unbuffered body and the connection behind it.
    ///
    /// Releasing twice is a no-op. A buffered body is kept.
    pub fn release(&mut self) {
        if let BodyState::Lazy(_) = self.body {
            tracing::trace!(status = self.status, "releasing unread response body");
            self.body = BodyState::Released;
        }
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            BodyState::Lazy(_) => "lazy".to_string(),
            BodyState::Buffered(bytes) => format!("buffered({} bytes)", bytes.len()),
            BodyState::Released => "released".to_string(),
        };
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &body)
            .finish()
    }
}

async fn read_all(mut stream: BodyStream) -> RestResult<Bytes> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(buf))
}

/// A decoded value together with the status and headers it came with.
#[derive(Debug, Clone)]
pub struct Response<T> {
    pub status: u16,
    pub headers: HeaderMap,
    pub value: T,
}

impl<T> Response<T> {
    /// Convert the value, keeping status and headers.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            status: self.status,
            headers: self.headers,
            value: f(self.value),
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_body(parts: &[&'static str], polls: Arc<AtomicUsize>) -> BodyStream {
        let items: Vec<io::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        stream::iter(items)
            .inspect(move |_| {
                polls.fetch_add(1, Ordering::SeqCst);
            })
            .boxed()
    }

    #[tokio::test]
    async fn unbuffered_body_is_read_once() {
        let polls = Arc::new(AtomicUsize::new(0));
        let mut response =
            HttpResponse::new(200, HeaderMap::new(), counting_body(&["ab", "c"], polls.clone()));

        assert_eq!(response.text().await.unwrap(), "abc");
        assert!(matches!(response.bytes().await, Err(RestError::BodyConsumed)));
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn buffering_twice_is_idempotent() {
        let polls = Arc::new(AtomicUsize::new(0));
        let mut response =
            HttpResponse::new(200, HeaderMap::new(), counting_body(&["he", "llo"], polls.clone()));

        response.buffer().await.unwrap();
        response.buffer().await.unwrap();

        let first = response.bytes().await.unwrap();
        let second = response.bytes().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(&first[..], b"hello");
        assert_eq!(response.text().await.unwrap(), "hello");
        assert_eq!(polls.load(Ordering::SeqCst), 2, "network read only once");
    }

    #[tokio::test]
    async fn buffered_stream_is_repeatable() {
        let mut response = HttpResponse::from_bytes(200, HeaderMap::new(), "data");

        for _ in 0..2 {
            let mut stream = response.body_stream().unwrap();
            let chunk = stream.next().await.unwrap().unwrap();
            assert_eq!(&chunk[..], b"data");
        }
        assert!(response.is_buffered());
    }

    #[tokio::test]
    async fn json_accessor_deserializes_buffered_body() {
        let mut response = HttpResponse::from_bytes(200, HeaderMap::new(), r#"{"a":1}"#);
        let first: serde_json::Value = response.json().await.unwrap();
        let second: serde_json::Value = response.json().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first["a"], 1);
    }

    #[tokio::test]
    async fn release_twice_is_a_no_op() {
        let polls = Arc::new(AtomicUsize::new(0));
        let mut response =
            HttpResponse::new(200, HeaderMap::new(), counting_body(&["x"], polls.clone()));

        response.release();
        response.release();

        assert!(matches!(response.bytes().await, Err(RestError::BodyConsumed)));
        assert_eq!(polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn release_keeps_buffered_body() {
        let mut response = HttpResponse::from_bytes(200, HeaderMap::new(), "kept");
        response.release();
        assert_eq!(response.text().await.unwrap(), "kept");
    }

    #[test]
    fn response_map_keeps_status_and_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("etag", "\"1\"".parse().unwrap());
        let response = Response {
            status: 201,
            headers,
            value: 2,
        };
        let mapped = response.map(|v| v * 10);
        assert_eq!(mapped.status, 201);
        assert_eq!(mapped.value, 20);
        assert!(mapped.headers.contains_key("etag"));
    }
}
