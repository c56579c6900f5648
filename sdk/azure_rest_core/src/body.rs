//! Body serializer selection and declared-length validation.

use crate::error::{BodyLengthError, RestError, RestResult};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// A streamed body: chunks of bytes or an I/O failure.
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

/// Converts structured values to and from body bytes for one content type.
pub trait Serializer: Send + Sync + fmt::Debug {
    fn serialize(&self, value: &serde_json::Value) -> RestResult<Bytes>;

    fn deserialize(&self, bytes: &[u8]) -> RestResult<serde_json::Value>;
}

/// The default serializer for JSON content types.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &serde_json::Value) -> RestResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn deserialize(&self, bytes: &[u8]) -> RestResult<serde_json::Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Body handling selected from a content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Text,
    Raw,
}

impl BodyFormat {
    /// Select a format from a `Content-Type` value. Parameters such as
    /// `charset` are ignored; bodies are always UTF-8.
    pub fn from_content_type(content_type: &str) -> Self {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if mime == "application/json" || mime == "text/json" || mime.ends_with("+json") {
            Self::Json
        } else if mime.starts_with("text/") {
            Self::Text
        } else {
            Self::Raw
        }
    }

    /// Turn a structured argument into body bytes.
    pub fn encode(
        self,
        value: &serde_json::Value,
        serializer: &dyn Serializer,
    ) -> RestResult<Bytes> {
        match (self, value) {
            (Self::Text | Self::Raw, serde_json::Value::String(s)) => {
                Ok(Bytes::copy_from_slice(s.as_bytes()))
            }
            _ => serializer.serialize(value),
        }
    }

    /// Turn body bytes into a structured value.
    ///
    /// Text bodies holding a JSON scalar (for example a plain-text count)
    /// decode to that scalar; any other text decodes to a string. An empty
    /// body always decodes to `null`.
    pub fn decode(self, bytes: &[u8], serializer: &dyn Serializer) -> RestResult<serde_json::Value> {
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        match self {
            Self::Json | Self::Raw => serializer.deserialize(bytes),
            Self::Text => {
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    RestError::Io(io::Error::new(io::ErrorKind::InvalidData, e))
                })?;
                match serde_json::from_str::<serde_json::Value>(text.trim_start_matches('\u{feff}').trim()) {
                    Ok(scalar) if !scalar.is_object() && !scalar.is_array() => Ok(scalar),
                    _ => Ok(serde_json::Value::String(text.to_string())),
                }
            }
        }
    }
}

/// A request body argument as supplied by the caller.
pub enum RequestBody {
    Empty,
    /// Structured value serialized with the declared content type.
    Json(serde_json::Value),
    /// Raw bytes passed through unchanged.
    Bytes(Bytes),
    /// Unbuffered chunks passed through unchanged.
    Stream(BodyStream),
}

impl RequestBody {
    /// Serialize any `Serialize` value as a structured body.
    pub fn json<T: serde::Serialize>(value: &T) -> RestResult<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// Wrap a stream of chunks.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }

    /// Copy the body, unless it is a one-shot stream.
    pub fn try_clone(&self) -> Option<Self> {
        match self {
            Self::Empty => Some(Self::Empty),
            Self::Json(value) => Some(Self::Json(value.clone())),
            Self::Bytes(bytes) => Some(Self::Bytes(bytes.clone())),
            Self::Stream(_) => None,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Stream(_) => write!(f, "Stream(..)"),
        }
    }
}

/// A body ready for the transport.
pub enum HttpBody {
    Empty,
    Buffered(Bytes),
    Stream(BodyStream),
}

impl HttpBody {
    /// Collect the whole body into memory.
    pub async fn collect(self) -> io::Result<Bytes> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Buffered(bytes) => Ok(bytes),
            Self::Stream(mut stream) => {
                let mut buf = Vec::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(Bytes::from(buf))
            }
        }
    }

    pub fn try_clone(&self) -> Option<Self> {
        match self {
            Self::Empty => Some(Self::Empty),
            Self::Buffered(bytes) => Some(Self::Buffered(bytes.clone())),
            Self::Stream(_) => None,
        }
    }
}

impl fmt::Debug for HttpBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            Self::Stream(_) => write!(f, "Stream(..)"),
        }
    }
}

/// Apply the selected serializer and the declared-length check to a body argument.
pub fn prepare_body(
    body: RequestBody,
    content_type: &str,
    declared_length: Option<u64>,
    serializer: &dyn Serializer,
) -> RestResult<HttpBody> {
    let format = BodyFormat::from_content_type(content_type);

    let prepared = match body {
        RequestBody::Empty => HttpBody::Empty,
        RequestBody::Json(value) => HttpBody::Buffered(format.encode(&value, serializer)?),
        RequestBody::Bytes(bytes) => HttpBody::Buffered(bytes),
        RequestBody::Stream(stream) => HttpBody::Stream(stream),
    };

    match (declared_length, prepared) {
        (Some(declared), HttpBody::Buffered(bytes)) => {
            check_length(declared, bytes.len() as u64)?;
            Ok(HttpBody::Buffered(bytes))
        }
        (Some(declared), HttpBody::Stream(stream)) => Ok(HttpBody::Stream(
            LengthValidatingStream::new(stream, declared).boxed(),
        )),
        (Some(declared), HttpBody::Empty) => {
            check_length(declared, 0)?;
            Ok(HttpBody::Empty)
        }
        (None, prepared) => Ok(prepared),
    }
}

fn check_length(declared: u64, actual: u64) -> Result<(), BodyLengthError> {
    if declared == actual {
        Ok(())
    } else {
        Err(BodyLengthError { declared, actual })
    }
}

/// Passes chunks through while checking the total against a declared length.
///
/// Too many bytes fail on the chunk that crosses the limit. Too few bytes
/// fail when the inner stream reports its end, so an exact-length body is
/// only accepted once the source is actually exhausted.
pub struct LengthValidatingStream {
    inner: BodyStream,
    declared: u64,
    seen: u64,
    done: bool,
}

impl LengthValidatingStream {
    pub fn new(inner: BodyStream, declared: u64) -> Self {
        Self {
            inner,
            declared,
            seen: 0,
            done: false,
        }
    }

    fn fail(&mut self) -> Poll<Option<io::Result<Bytes>>> {
        self.done = true;
        let err = BodyLengthError {
            declared: self.declared,
            actual: self.seen,
        };
        Poll::Ready(Some(Err(io::Error::new(io::ErrorKind::InvalidData, err))))
    }
}

impl Stream for LengthValidatingStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match ready!(this.inner.poll_next_unpin(cx)) {
            Some(Ok(chunk)) => {
                this.seen += chunk.len() as u64;
                if this.seen > this.declared {
                    return this.fail();
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            None if this.seen < this.declared => this.fail(),
            None => {
                this.done = true;
                Poll::Ready(None)
            }
        }
    }
}

/// Find a [`BodyLengthError`] anywhere in an error's source chain.
pub fn find_length_error(err: &(dyn std::error::Error + 'static)) -> Option<BodyLengthError> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<BodyLengthError>() {
            return Some(found.clone());
        }
        if let Some(found) = e
            .downcast_ref::<io::Error>()
            .and_then(|io| io.get_ref())
            .and_then(|inner| inner.downcast_ref::<BodyLengthError>())
        {
            return Some(found.clone());
        }
        current = e.source();
    }
    None
}
