//! Document operations against one search index.
//!
//! ## Example
//!
//! ```rust,no_run
//! use azure_rest_core::client::RestClient;
//! use azure_search_documents::documents::{SearchDocumentsClient, SearchOptions};
//! use futures::TryStreamExt;
//! use serde_json::Value;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RestClient::builder()
//!     .endpoint("https://my-service.search.windows.net")
//!     .build()?;
//! let hotels = SearchDocumentsClient::new(client, "hotels")?;
//!
//! let total = hotels.count().await?;
//! let hits: Vec<_> = hotels
//!     .search::<Value>(&SearchOptions::new("luxury").top(10))?
//!     .into_items()
//!     .try_collect()
//!     .await?;
//! println!("{} of {total} documents matched", hits.len());
//! # Ok(())
//! # }
//! ```

use crate::batch::{IndexBatchException, IndexDocumentsBatch, IndexDocumentsResult};
use crate::error::SearchResult;
use azure_rest_core::client::RestClient;
use azure_rest_core::exception::{ExceptionMapping, ExceptionType};
use azure_rest_core::paging::{ContinuationToken, PagedStream};
use azure_rest_core::resolve::Arguments;
use azure_rest_core::template::{
    ContinuationMode, PageSpec, ParameterBinding, RequestTemplate, RequestTemplateBuilder,
    ReturnShape, TemplateRegistry,
};
use azure_rest_core::transport::RequestOptions;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Catch-all error for unexpected statuses.
pub const SEARCH_ERROR: ExceptionType = ExceptionType::new("SearchErrorException");
/// 404 on a document or index.
pub const RESOURCE_NOT_FOUND: ExceptionType = ExceptionType::new("ResourceNotFoundException");
/// 409 or 412 on a conditional request.
pub const RESOURCE_MODIFIED: ExceptionType = ExceptionType::new("ResourceModifiedException");

const INDEX: &str = "Documents_Index";
const GET: &str = "Documents_Get";
const COUNT: &str = "Documents_Count";
const SEARCH: &str = "Documents_SearchPost";
const EXISTS: &str = "Indexes_Exists";
const DELETE_INDEX: &str = "Indexes_Delete";

/// Options for [`SearchDocumentsClient::index_documents`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDocumentsOptions {
    /// Fail with [`IndexBatchException`] if any action failed. Defaults to `true`.
    pub throw_on_any_error: bool,
}

impl Default for IndexDocumentsOptions {
    fn default() -> Self {
        Self {
            throw_on_any_error: true,
        }
    }
}

/// Query parameters for [`SearchDocumentsClient::search`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    #[serde(rename = "search", skip_serializing_if = "Option::is_none")]
    pub search_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Comma-separated fields to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,
    #[serde(rename = "orderby", skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<bool>,
}

impl SearchOptions {
    pub fn new(search_text: impl Into<String>) -> Self {
        Self {
            search_text: Some(search_text.into()),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields: Vec<String> = fields.into_iter().map(|f| f.as_ref().to_string()).collect();
        self.select = Some(fields.join(","));
        self
    }

    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn top(mut self, top: u32) -> Self {
        self.top = Some(top);
        self
    }

    pub fn skip(mut self, skip: u32) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// One search hit: the document plus its relevance score.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit<T> {
    #[serde(rename = "@search.score", default)]
    pub score: f64,
    #[serde(flatten)]
    pub document: T,
}

/// Client for the documents of one index.
#[derive(Debug, Clone)]
pub struct SearchDocumentsClient {
    client: RestClient,
    index_name: String,
    templates: TemplateRegistry,
}

fn operation(id: &str, method: Method, path: &str) -> RequestTemplateBuilder {
    RequestTemplate::builder(id, method)
        .host("{endpoint}")
        .path(path)
        .binding(ParameterBinding::host("endpoint").encoded())
        .binding(ParameterBinding::path("indexName"))
        .binding(ParameterBinding::query("api-version"))
        .default_exception(SEARCH_ERROR)
}

fn build_registry() -> SearchResult<TemplateRegistry> {
    let mut registry = TemplateRegistry::new();

    registry.register(
        operation(INDEX, Method::POST, "/indexes('{indexName}')/docs/search.index")
            .binding(ParameterBinding::body("batch"))
            .expected_statuses([200, 207])
            .build()?,
    )?;

    registry.register(
        operation(GET, Method::GET, "/indexes('{indexName}')/docs('{key}')")
            .binding(ParameterBinding::path("key"))
            .binding(ParameterBinding::query("selectedFields").wire_name("$select"))
            .exception(ExceptionMapping::for_statuses([404], RESOURCE_NOT_FOUND))
            .build()?,
    )?;

    registry.register(
        operation(COUNT, Method::GET, "/indexes('{indexName}')/docs/$count")
            .binding(ParameterBinding::header("accept").wire_name("Accept"))
            .build()?,
    )?;

    registry.register(
        operation(SEARCH, Method::POST, "/indexes('{indexName}')/docs/search.post.search")
            .binding(ParameterBinding::body("searchRequest"))
            .returns(ReturnShape::Paged(PageSpec::new(
                "value",
                "@search.nextPageParameters",
                ContinuationMode::Body,
            )))
            .build()?,
    )?;

    registry.register(
        operation(EXISTS, Method::GET, "/indexes('{indexName}')")
            .expected_statuses([200])
            .returns(ReturnShape::BooleanFromStatus)
            .build()?,
    )?;

    registry.register(
        operation(DELETE_INDEX, Method::DELETE, "/indexes('{indexName}')")
            .binding(ParameterBinding::header("ifMatch").wire_name("If-Match"))
            .expected_statuses([204, 404])
            .exception(ExceptionMapping::for_statuses([409, 412], RESOURCE_MODIFIED))
            .returns(ReturnShape::Void)
            .build()?,
    )?;

    Ok(registry)
}

impl SearchDocumentsClient {
    /// Create a client for `index_name`.
    ///
    /// # Errors
    ///
    /// Fails only if an operation description is malformed.
    pub fn new(client: RestClient, index_name: impl Into<String>) -> SearchResult<Self> {
        Ok(Self {
            client,
            index_name: index_name.into(),
            templates: build_registry()?,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn rest_client(&self) -> &RestClient {
        &self.client
    }

    fn args(&self) -> Arguments {
        Arguments::new().with("indexName", self.index_name.as_str())
    }

    /// Submit a batch and return every per-action result, failed or not.
    #[tracing::instrument(
        name = "azure_search::documents::index",
        skip(self, batch),
        fields(index = %self.index_name, actions = batch.len())
    )]
    pub async fn index<T: Serialize>(
        &self,
        batch: &IndexDocumentsBatch<T>,
    ) -> SearchResult<IndexDocumentsResult> {
        tracing::debug!("submitting batch");
        let template = self.templates.get(INDEX)?;
        let args = self.args().with_json(batch)?;
        let result: IndexDocumentsResult = self.client.send_json(&template, args).await?;
        tracing::debug!(
            failed = result.failed().count(),
            "batch processed"
        );
        Ok(result)
    }

    /// Submit a batch, failing on any failed action unless told otherwise.
    ///
    /// # Errors
    ///
    /// With [`IndexDocumentsOptions::throw_on_any_error`] set (the default),
    /// any failed action yields [`SearchError::IndexBatch`](crate::error::SearchError::IndexBatch)
    /// carrying every result.
    pub async fn index_documents<T: Serialize>(
        &self,
        batch: &IndexDocumentsBatch<T>,
        options: IndexDocumentsOptions,
    ) -> SearchResult<IndexDocumentsResult> {
        let result = self.index(batch).await?;
        if options.throw_on_any_error && result.has_failures() {
            return Err(IndexBatchException::new(result.results).into());
        }
        Ok(result)
    }

    /// Upload documents, replacing existing ones with the same key.
    pub async fn upload_documents<T: Serialize>(
        &self,
        documents: impl IntoIterator<Item = T>,
    ) -> SearchResult<IndexDocumentsResult> {
        let batch = IndexDocumentsBatch::new().upload(documents);
        self.index_documents(&batch, IndexDocumentsOptions::default())
            .await
    }

    /// Merge fields into existing documents.
    pub async fn merge_documents<T: Serialize>(
        &self,
        documents: impl IntoIterator<Item = T>,
    ) -> SearchResult<IndexDocumentsResult> {
        let batch = IndexDocumentsBatch::new().merge(documents);
        self.index_documents(&batch, IndexDocumentsOptions::default())
            .await
    }

    /// Delete documents; only their key fields are required.
    pub async fn delete_documents<T: Serialize>(
        &self,
        documents: impl IntoIterator<Item = T>,
    ) -> SearchResult<IndexDocumentsResult> {
        let batch = IndexDocumentsBatch::new().delete(documents);
        self.index_documents(&batch, IndexDocumentsOptions::default())
            .await
    }

    /// Fetch a document by key, optionally limited to `selected_fields`.
    #[tracing::instrument(
        name = "azure_search::documents::get_document",
        skip(self, selected_fields),
        fields(index = %self.index_name)
    )]
    pub async fn get_document<T: DeserializeOwned>(
        &self,
        key: &str,
        selected_fields: Option<&[&str]>,
    ) -> SearchResult<T> {
        let template = self.templates.get(GET)?;
        let args = self
            .args()
            .with("key", key)
            .with("selectedFields", selected_fields.map(<[&str]>::to_vec));
        Ok(self.client.send_json(&template, args).await?)
    }

    /// Number of documents in the index.
    #[tracing::instrument(
        name = "azure_search::documents::count",
        skip(self),
        fields(index = %self.index_name)
    )]
    pub async fn count(&self) -> SearchResult<u64> {
        let template = self.templates.get(COUNT)?;
        let args = self.args().with("accept", "text/plain");
        let count: u64 = self.client.send_scalar(&template, args).await?;
        tracing::debug!(count, "counted documents");
        Ok(count)
    }

    /// Search the index; pages are fetched as the stream is polled.
    ///
    /// # Errors
    ///
    /// Fails immediately only if `options` cannot be serialized.
    #[tracing::instrument(
        name = "azure_search::documents::search",
        skip(self, options),
        fields(index = %self.index_name)
    )]
    pub fn search<T: DeserializeOwned + Send + 'static>(
        &self,
        options: &SearchOptions,
    ) -> SearchResult<PagedStream<SearchHit<T>>> {
        let template = self.templates.get(SEARCH)?;
        let args = self.args().with_json(options)?;
        Ok(self
            .client
            .list_pages(template, args, RequestOptions::default())?)
    }

    /// Continue a search from a page's continuation token.
    pub fn search_from<T: DeserializeOwned + Send + 'static>(
        &self,
        token: ContinuationToken,
    ) -> SearchResult<PagedStream<SearchHit<T>>> {
        let template = self.templates.get(SEARCH)?;
        Ok(self
            .client
            .list_pages_from(template, self.args(), token, RequestOptions::default())?)
    }

    /// Whether the index exists.
    #[tracing::instrument(
        name = "azure_search::documents::index_exists",
        skip(self),
        fields(index = %self.index_name)
    )]
    pub async fn index_exists(&self) -> SearchResult<bool> {
        let template = self.templates.get(EXISTS)?;
        Ok(self.client.send_exists(&template, self.args()).await?)
    }

    /// Delete the index. Deleting a missing index succeeds.
    ///
    /// With `if_match`, the delete only happens if the index's ETag matches.
    #[tracing::instrument(
        name = "azure_search::documents::delete_index",
        skip(self),
        fields(index = %self.index_name)
    )]
    pub async fn delete_index(&self, if_match: Option<&str>) -> SearchResult<()> {
        let template = self.templates.get(DELETE_INDEX)?;
        let args = self.args().with("ifMatch", if_match);
        self.client.send_void(&template, args).await?;
        tracing::debug!("index deleted");
        Ok(())
    }
}
