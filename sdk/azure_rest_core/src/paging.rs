//! Lazily fetched sequences of pages.
//!
//! A paged operation is driven by a [`PageRetriever`]: given the previous
//! page's [`ContinuationToken`] (or none for the first page) it fetches one
//! page. [`PagedStream`] drives a retriever asynchronously;
//! [`PagedIterator`](crate::blocking::PagedIterator) drives the same stream
//! from blocking code.
//!
//! The protocol version recorded in the first continuation token is pinned
//! for the lifetime of the sequence. A later token issued under another
//! version ends the sequence with [`RestError::ProtocolVersionMismatch`].

use crate::error::{RestError, RestResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Opaque resume point of a paged sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationToken {
    #[serde(rename = "nextPageParameters")]
    next_page_parameters: serde_json::Value,
    #[serde(rename = "apiVersion")]
    protocol_version: String,
}

impl ContinuationToken {
    pub fn new(next_page_parameters: serde_json::Value, protocol_version: impl Into<String>) -> Self {
        Self {
            next_page_parameters,
            protocol_version: protocol_version.into(),
        }
    }

    /// The payload the service returned for the next page.
    pub fn next_page_parameters(&self) -> &serde_json::Value {
        &self.next_page_parameters
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Encode the token for storage outside the process.
    pub fn to_opaque_string(&self) -> RestResult<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode a token produced by [`to_opaque_string`](Self::to_opaque_string).
    pub fn from_opaque_string(token: &str) -> RestResult<Self> {
        let json = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| RestError::InvalidContinuationToken(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| RestError::InvalidContinuationToken(e.to_string()))
    }
}

/// One page of elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub elements: Vec<T>,
    /// Where the next page starts; `None` on the last page.
    pub continuation_token: Option<ContinuationToken>,
}

impl<T> Page<T> {
    pub fn is_last(&self) -> bool {
        self.continuation_token.is_none()
    }
}

/// Fetches a single page.
///
/// Implemented for any `Fn(Option<ContinuationToken>) -> Future` closure.
pub trait PageRetriever<T>: Send + Sync {
    fn retrieve(&self, token: Option<ContinuationToken>) -> BoxFuture<'static, RestResult<Page<T>>>;
}

impl<T, F, Fut> PageRetriever<T> for F
where
    F: Fn(Option<ContinuationToken>) -> Fut + Send + Sync,
    Fut: Future<Output = RestResult<Page<T>>> + Send + 'static,
{
    fn retrieve(&self, token: Option<ContinuationToken>) -> BoxFuture<'static, RestResult<Page<T>>> {
        Box::pin(self(token))
    }
}

enum State {
    Next {
        token: Option<ContinuationToken>,
        pinned: Option<String>,
    },
    Failed(RestError),
    Done,
}

/// An asynchronous, lazily fetched sequence of pages.
///
/// Nothing is requested until the stream is first polled. Dropping the
/// stream cancels any fetch in flight. The sequence ends after the first
/// page without a continuation token or after the first error.
pub struct PagedStream<T> {
    inner: BoxStream<'static, RestResult<Page<T>>>,
}

impl<T: Send + 'static> PagedStream<T> {
    /// Start from the first page.
    pub fn new(retriever: impl PageRetriever<T> + 'static) -> Self {
        Self::with_state(
            Arc::new(retriever),
            State::Next {
                token: None,
                pinned: None,
            },
        )
    }

    /// Resume at the page `token` points to.
    pub fn resume(retriever: impl PageRetriever<T> + 'static, token: ContinuationToken) -> Self {
        let pinned = Some(token.protocol_version().to_string());
        Self::with_state(
            Arc::new(retriever),
            State::Next {
                token: Some(token),
                pinned,
            },
        )
    }

    fn with_state(retriever: Arc<dyn PageRetriever<T>>, state: State) -> Self {
        let inner = stream::unfold((retriever, state), |(retriever, state)| async move {
            let (token, pinned) = match state {
                State::Next { token, pinned } => (token, pinned),
                State::Failed(err) => return Some((Err(err), (retriever, State::Done))),
                State::Done => return None,
            };

            let page = match retriever.retrieve(token).await {
                Ok(page) => page,
                Err(err) => return Some((Err(err), (retriever, State::Done))),
            };

            let next = match &page.continuation_token {
                None => State::Done,
                Some(next) => {
                    let pinned = pinned.unwrap_or_else(|| next.protocol_version().to_string());
                    if next.protocol_version() == pinned {
                        State::Next {
                            token: Some(next.clone()),
                            pinned: Some(pinned),
                        }
                    } else {
                        State::Failed(RestError::ProtocolVersionMismatch {
                            expected: pinned,
                            actual: next.protocol_version().to_string(),
                        })
                    }
                }
            };

            tracing::trace!(
                elements = page.elements.len(),
                last = page.is_last(),
                "fetched page"
            );
            Some((Ok(page), (retriever, next)))
        })
        .boxed();

        Self { inner }
    }

    /// Flatten the pages into their elements.
    pub fn into_items(self) -> BoxStream<'static, RestResult<T>> {
        self.inner
            .flat_map(|page| match page {
                Ok(page) => stream::iter(page.elements.into_iter().map(Ok).collect::<Vec<_>>()),
                Err(err) => stream::iter(vec![Err(err)]),
            })
            .boxed()
    }
}

impl<T> Stream for PagedStream<T> {
    type Item = RestResult<Page<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<T> fmt::Debug for PagedStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn page(elements: Vec<i32>, next: Option<(serde_json::Value, &str)>) -> RestResult<Page<i32>> {
        Ok(Page {
            elements,
            continuation_token: next.map(|(p, v)| ContinuationToken::new(p, v)),
        })
    }

    #[test]
    fn opaque_token_round_trips() {
        let token = ContinuationToken::new(json!({"skip": 50, "search": "*"}), "2024-07-01");
        let opaque = token.to_opaque_string().unwrap();
        assert!(!opaque.contains('{'));
        assert_eq!(ContinuationToken::from_opaque_string(&opaque).unwrap(), token);
    }

    #[test]
    fn opaque_token_serializes_field_names() {
        let token = ContinuationToken::new(json!({"skip": 50}), "2024-07-01");
        let value = serde_json::to_value(&token).unwrap();
        assert_eq!(value["apiVersion"], "2024-07-01");
        assert_eq!(value["nextPageParameters"]["skip"], 50);
    }

    #[test]
    fn garbage_token_is_rejected() {
        let err = ContinuationToken::from_opaque_string("not base64!").unwrap_err();
        assert!(matches!(err, RestError::InvalidContinuationToken(_)));

        let not_json = URL_SAFE_NO_PAD.encode("plain text");
        let err = ContinuationToken::from_opaque_string(&not_json).unwrap_err();
        assert!(matches!(err, RestError::InvalidContinuationToken(_)));
    }

    #[tokio::test]
    async fn nothing_is_fetched_until_polled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let stream = PagedStream::new(move |_token: Option<ContinuationToken>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { page(vec![1], None) }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let pages: Vec<Page<i32>> = stream.try_collect().await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_fetch_uses_first_token() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let stream = PagedStream::new(move |token: Option<ContinuationToken>| {
            record.lock().unwrap().push(token.clone());
            async move {
                match token {
                    None => page(vec![1, 2], Some((json!({"skip": 2}), "v1"))),
                    Some(_) => page(vec![3], None),
                }
            }
        });

        let items: Vec<i32> = stream.into_items().try_collect().await.unwrap();
        assert_eq!(items, vec![1, 2, 3]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_none());
        assert_eq!(
            seen[1].as_ref().unwrap().next_page_parameters(),
            &json!({"skip": 2})
        );
    }

    #[tokio::test]
    async fn version_change_mid_sequence_fails() {
        let stream = PagedStream::new(move |token: Option<ContinuationToken>| async move {
            match token {
                None => page(vec![1], Some((json!({"skip": 1}), "v1"))),
                Some(_) => page(vec![2], Some((json!({"skip": 2}), "v2"))),
            }
        });

        let results: Vec<RestResult<Page<i32>>> = stream.collect().await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        match &results[2] {
            Err(RestError::ProtocolVersionMismatch { expected, actual }) => {
                assert_eq!(expected, "v1");
                assert_eq!(actual, "v2");
            }
            other => panic!("Expected version mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resume_starts_from_token() {
        let token = ContinuationToken::new(json!({"skip": 10}), "v1");
        let stream = PagedStream::resume(
            move |token: Option<ContinuationToken>| async move {
                let skip = token
                    .as_ref()
                    .and_then(|t| t.next_page_parameters()["skip"].as_i64())
                    .unwrap_or(0) as i32;
                page(vec![skip], None)
            },
            token,
        );

        let items: Vec<i32> = stream.into_items().try_collect().await.unwrap();
        assert_eq!(items, vec![10]);
    }

    #[tokio::test]
    async fn error_ends_the_sequence() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let stream = PagedStream::<i32>::new(move |_token: Option<ContinuationToken>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<Page<i32>, _>(RestError::MissingArgument("indexName".into())) }
        });

        let results: Vec<_> = stream.collect().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
