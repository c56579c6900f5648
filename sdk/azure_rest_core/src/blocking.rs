//! Blocking wrappers over [`RestClient`].
//!
//! [`BlockingRestClient`] owns a private current-thread tokio runtime and
//! drives the asynchronous pipeline to completion on the calling thread.
//! Do not call it from inside an async context; use [`RestClient`] there.

use crate::client::RestClient;
use crate::decode::Decoded;
use crate::error::RestResult;
use crate::paging::{ContinuationToken, Page, PagedStream};
use crate::resolve::Arguments;
use crate::response::{HttpResponse, Response};
use crate::template::RequestTemplate;
use crate::transport::RequestOptions;
use bytes::Bytes;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

/// Synchronous facade over a [`RestClient`].
#[derive(Clone)]
pub struct BlockingRestClient {
    inner: RestClient,
    runtime: Arc<Runtime>,
}

impl BlockingRestClient {
    /// Wrap `client` with a dedicated runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Io`](crate::error::RestError::Io) if the runtime
    /// cannot be started.
    pub fn new(client: RestClient) -> RestResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            inner: client,
            runtime: Arc::new(runtime),
        })
    }

    pub fn client(&self) -> &RestClient {
        &self.inner
    }

    pub fn invoke(
        &self,
        template: &RequestTemplate,
        args: Arguments,
        options: RequestOptions,
    ) -> RestResult<Decoded> {
        self.runtime
            .block_on(self.inner.invoke(template, args, options))
    }

    pub fn send_void(&self, template: &RequestTemplate, args: Arguments) -> RestResult<()> {
        self.runtime.block_on(self.inner.send_void(template, args))
    }

    pub fn send_exists(&self, template: &RequestTemplate, args: Arguments) -> RestResult<bool> {
        self.runtime.block_on(self.inner.send_exists(template, args))
    }

    pub fn send_bytes(&self, template: &RequestTemplate, args: Arguments) -> RestResult<Bytes> {
        self.runtime.block_on(self.inner.send_bytes(template, args))
    }

    pub fn send_json<T: DeserializeOwned>(
        &self,
        template: &RequestTemplate,
        args: Arguments,
    ) -> RestResult<T> {
        self.runtime.block_on(self.inner.send_json(template, args))
    }

    pub fn send_scalar<T: DeserializeOwned + Default>(
        &self,
        template: &RequestTemplate,
        args: Arguments,
    ) -> RestResult<T> {
        self.runtime.block_on(self.inner.send_scalar(template, args))
    }

    pub fn send_with_response<T: DeserializeOwned>(
        &self,
        template: &RequestTemplate,
        args: Arguments,
    ) -> RestResult<Response<T>> {
        self.runtime
            .block_on(self.inner.send_with_response(template, args))
    }

    pub fn send_scalar_with_response<T: DeserializeOwned + Default>(
        &self,
        template: &RequestTemplate,
        args: Arguments,
    ) -> RestResult<Response<T>> {
        self.runtime
            .block_on(self.inner.send_scalar_with_response(template, args))
    }

    /// The response is buffered before returning; a lazy body cannot outlive
    /// the call that drives it.
    pub fn send_stream(
        &self,
        template: &RequestTemplate,
        args: Arguments,
        options: RequestOptions,
    ) -> RestResult<HttpResponse> {
        self.runtime.block_on(async {
            let mut response = self.inner.send_stream(template, args, options).await?;
            response.buffer().await?;
            Ok(response)
        })
    }

    /// Iterate a paged operation; pages are fetched as the iterator advances.
    pub fn list_pages<T: DeserializeOwned + Send + 'static>(
        &self,
        template: Arc<RequestTemplate>,
        args: Arguments,
        options: RequestOptions,
    ) -> RestResult<PagedIterator<T>> {
        let stream = self.inner.list_pages(template, args, options)?;
        Ok(PagedIterator::new(stream, Arc::clone(&self.runtime)))
    }

    pub fn list_pages_from<T: DeserializeOwned + Send + 'static>(
        &self,
        template: Arc<RequestTemplate>,
        args: Arguments,
        token: ContinuationToken,
        options: RequestOptions,
    ) -> RestResult<PagedIterator<T>> {
        let stream = self.inner.list_pages_from(template, args, token, options)?;
        Ok(PagedIterator::new(stream, Arc::clone(&self.runtime)))
    }
}

impl fmt::Debug for BlockingRestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingRestClient")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

/// Blocking iterator over the pages of a [`PagedStream`].
pub struct PagedIterator<T> {
    stream: PagedStream<T>,
    runtime: Arc<Runtime>,
}

impl<T: Send + 'static> PagedIterator<T> {
    pub fn new(stream: PagedStream<T>, runtime: Arc<Runtime>) -> Self {
        Self { stream, runtime }
    }

    /// Iterate elements instead of pages.
    pub fn into_items(self) -> impl Iterator<Item = RestResult<T>> {
        self.flat_map(|page| match page {
            Ok(page) => page.elements.into_iter().map(Ok).collect::<Vec<_>>(),
            Err(err) => vec![Err(err)],
        })
    }
}

impl<T> Iterator for PagedIterator<T> {
    type Item = RestResult<Page<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.stream.next())
    }
}

impl<T> fmt::Debug for PagedIterator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedIterator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RestError;
    use crate::template::{ContinuationMode, PageSpec, ParameterBinding, ReturnShape};
    use reqwest::Method;
    use serde::Deserialize;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Doc {
        id: String,
    }

    /// The mock server runs on its own multi-thread runtime so it keeps
    /// serving while the test thread blocks.
    fn start_server() -> (Runtime, MockServer) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let server = runtime.block_on(MockServer::start());
        (runtime, server)
    }

    fn blocking_client(server: &MockServer) -> BlockingRestClient {
        let client = RestClient::builder()
            .endpoint(server.uri())
            .api_version("2024-07-01")
            .build()
            .unwrap();
        BlockingRestClient::new(client).unwrap()
    }

    fn template(id: &str, verb: Method, path_template: &str) -> crate::template::RequestTemplateBuilder {
        RequestTemplate::builder(id, verb)
            .host("{endpoint}")
            .path(path_template)
            .binding(ParameterBinding::host("endpoint").encoded())
            .binding(ParameterBinding::query("api-version"))
    }

    #[test]
    fn blocking_send_json() {
        let (rt, server) = start_server();
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/docs/7"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "7"})))
                .mount(&server),
        );

        let client = blocking_client(&server);
        let template = template("Docs_Get", Method::GET, "/docs/{key}")
            .binding(ParameterBinding::path("key"))
            .build()
            .unwrap();

        let doc: Doc = client
            .send_json(&template, Arguments::new().with("key", "7"))
            .unwrap();
        assert_eq!(doc.id, "7");
    }

    #[test]
    fn blocking_exists_and_errors() {
        let (rt, server) = start_server();
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/indexes/none"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&server),
        );

        let client = blocking_client(&server);
        let exists = template("Indexes_Exists", Method::GET, "/indexes/{name}")
            .binding(ParameterBinding::path("name"))
            .returns(ReturnShape::BooleanFromStatus)
            .build()
            .unwrap();
        let get = template("Indexes_Get", Method::GET, "/indexes/{name}")
            .binding(ParameterBinding::path("name"))
            .build()
            .unwrap();

        assert!(!client
            .send_exists(&exists, Arguments::new().with("name", "none"))
            .unwrap());
        let err = client
            .send_json::<serde_json::Value>(&get, Arguments::new().with("name", "none"))
            .unwrap_err();
        assert!(matches!(err, RestError::Http(ref e) if e.status == 404));
    }

    #[test]
    fn blocking_iterator_uses_same_retriever() {
        let (rt, server) = start_server();
        rt.block_on(async {
            Mock::given(method("POST"))
                .and(path("/docs/search"))
                .and(body_json(json!({"search": "*"})))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "value": [{"id": "1"}],
                    "@search.nextPageParameters": {"search": "*", "skip": 1}
                })))
                .expect(1)
                .mount(&server)
                .await;
            Mock::given(method("POST"))
                .and(path("/docs/search"))
                .and(body_json(json!({"search": "*", "skip": 1})))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "value": [{"id": "2"}]
                })))
                .expect(1)
                .mount(&server)
                .await;
        });

        let client = blocking_client(&server);
        let template = Arc::new(
            template("Documents_Search", Method::POST, "/docs/search")
                .binding(ParameterBinding::body("searchRequest"))
                .returns(ReturnShape::Paged(PageSpec::new(
                    "value",
                    "@search.nextPageParameters",
                    ContinuationMode::Body,
                )))
                .build()
                .unwrap(),
        );

        let args = Arguments::new().with_json(&json!({"search": "*"})).unwrap();
        let mut pages = client
            .list_pages::<Doc>(template, args, RequestOptions::default())
            .unwrap();

        let first = pages.next().unwrap().unwrap();
        assert_eq!(first.elements, vec![Doc { id: "1".into() }]);
        assert!(!first.is_last());
        let second = pages.next().unwrap().unwrap();
        assert!(second.is_last());
        assert!(pages.next().is_none());
    }

    #[test]
    fn blocking_stream_is_buffered() {
        let (rt, server) = start_server();
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/blob"))
                .respond_with(ResponseTemplate::new(200).set_body_string("contents"))
                .mount(&server),
        );

        let client = blocking_client(&server);
        let template = template("Blob_Download", Method::GET, "/blob")
            .returns(ReturnShape::Stream)
            .build()
            .unwrap();

        let response = client
            .send_stream(&template, Arguments::new(), RequestOptions::default())
            .unwrap();
        assert!(response.is_buffered());
    }
}
