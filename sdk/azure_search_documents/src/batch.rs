//! Indexing batches and partial-failure handling.
//!
//! A batch submits several document actions at once. The service answers
//! `200` when every action succeeded and `207` when some failed; each action
//! gets its own [`IndexingResult`]. Failed actions whose status is transient
//! can be resubmitted with [`find_failed_actions_to_retry`].
//!
//! ## Example
//!
//! ```rust
//! use azure_search_documents::batch::{
//!     find_failed_actions_to_retry, IndexDocumentsBatch, IndexingResult,
//! };
//! use serde_json::json;
//!
//! let batch = IndexDocumentsBatch::new()
//!     .upload([json!({"id": "1"}), json!({"id": "2"})]);
//! let results = vec![
//!     IndexingResult::new("1", false, 503, Some("throttled")),
//!     IndexingResult::new("2", true, 201, None),
//! ];
//!
//! let retry = find_failed_actions_to_retry(&batch, &results, |doc| {
//!     doc["id"].as_str().unwrap_or_default().to_string()
//! });
//! assert_eq!(retry.len(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// What to do with a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexActionType {
    /// Insert, or replace an existing document.
    #[serde(rename = "upload")]
    Upload,
    /// Update fields of an existing document.
    #[serde(rename = "merge")]
    Merge,
    /// Merge into an existing document, or upload if absent.
    #[serde(rename = "mergeOrUpload")]
    MergeOrUpload,
    /// Remove a document; only its key is needed.
    #[serde(rename = "delete")]
    Delete,
}

/// One document action.
///
/// Serializes as the document's own fields plus `@search.action`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexAction<T> {
    #[serde(rename = "@search.action")]
    action_type: IndexActionType,
    #[serde(flatten)]
    document: T,
}

impl<T> IndexAction<T> {
    pub fn new(action_type: IndexActionType, document: T) -> Self {
        Self {
            action_type,
            document,
        }
    }

    pub fn upload(document: T) -> Self {
        Self::new(IndexActionType::Upload, document)
    }

    pub fn merge(document: T) -> Self {
        Self::new(IndexActionType::Merge, document)
    }

    pub fn merge_or_upload(document: T) -> Self {
        Self::new(IndexActionType::MergeOrUpload, document)
    }

    pub fn delete(document: T) -> Self {
        Self::new(IndexActionType::Delete, document)
    }

    pub fn action_type(&self) -> IndexActionType {
        self.action_type
    }

    pub fn document(&self) -> &T {
        &self.document
    }
}

/// An ordered list of actions submitted together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexDocumentsBatch<T> {
    #[serde(rename = "value")]
    actions: Vec<IndexAction<T>>,
}

impl<T> Default for IndexDocumentsBatch<T> {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
        }
    }
}

impl<T> IndexDocumentsBatch<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one action.
    pub fn action(mut self, action: IndexAction<T>) -> Self {
        self.actions.push(action);
        self
    }

    pub fn upload(self, documents: impl IntoIterator<Item = T>) -> Self {
        self.extend(IndexActionType::Upload, documents)
    }

    pub fn merge(self, documents: impl IntoIterator<Item = T>) -> Self {
        self.extend(IndexActionType::Merge, documents)
    }

    pub fn merge_or_upload(self, documents: impl IntoIterator<Item = T>) -> Self {
        self.extend(IndexActionType::MergeOrUpload, documents)
    }

    pub fn delete(self, documents: impl IntoIterator<Item = T>) -> Self {
        self.extend(IndexActionType::Delete, documents)
    }

    fn extend(mut self, action_type: IndexActionType, documents: impl IntoIterator<Item = T>) -> Self {
        self.actions.extend(
            documents
                .into_iter()
                .map(|document| IndexAction::new(action_type, document)),
        );
        self
    }

    pub fn actions(&self) -> &[IndexAction<T>] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl<T> FromIterator<IndexAction<T>> for IndexDocumentsBatch<T> {
    fn from_iter<I: IntoIterator<Item = IndexAction<T>>>(iter: I) -> Self {
        Self {
            actions: iter.into_iter().collect(),
        }
    }
}

/// Outcome of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingResult {
    /// Key of the document the action targeted.
    pub key: String,
    /// Whether the action succeeded.
    #[serde(rename = "status")]
    pub succeeded: bool,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(rename = "errorMessage", default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl IndexingResult {
    pub fn new(
        key: impl Into<String>,
        succeeded: bool,
        status_code: u16,
        error_message: Option<&str>,
    ) -> Self {
        Self {
            key: key.into(),
            succeeded,
            status_code,
            error_message: error_message.map(str::to_string),
        }
    }

    /// Failed with a status worth resubmitting.
    pub fn is_retriable(&self) -> bool {
        !self.succeeded && is_retriable_status(self.status_code)
    }
}

/// Per-action outcomes of a batch, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocumentsResult {
    #[serde(rename = "value")]
    pub results: Vec<IndexingResult>,
}

impl IndexDocumentsResult {
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| !r.succeeded)
    }

    pub fn failed(&self) -> impl Iterator<Item = &IndexingResult> {
        self.results.iter().filter(|r| !r.succeeded)
    }
}

/// Whether a failed action's status code is transient.
///
/// | status | meaning | retriable |
/// |--------|---------|-----------|
/// | 409 | version conflict | yes |
/// | 422 | index temporarily unavailable | yes |
/// | 503 | service busy | yes |
/// | anything else | | no |
///
/// `200` and `201` are successes and never reach this check.
pub fn is_retriable_status(status: u16) -> bool {
    matches!(status, 409 | 422 | 503)
}

/// A new batch holding exactly the actions whose key failed retriably.
///
/// `key_fn` extracts the document key the service reports in
/// [`IndexingResult::key`]. Payloads and order are preserved.
pub fn find_failed_actions_to_retry<T: Clone>(
    batch: &IndexDocumentsBatch<T>,
    results: &[IndexingResult],
    key_fn: impl Fn(&T) -> String,
) -> IndexDocumentsBatch<T> {
    let retriable: HashSet<&str> = results
        .iter()
        .filter(|r| r.is_retriable())
        .map(|r| r.key.as_str())
        .collect();

    batch
        .actions
        .iter()
        .filter(|action| retriable.contains(key_fn(&action.document).as_str()))
        .cloned()
        .collect()
}

/// Raised when a batch had failed actions and the caller asked to fail on any.
///
/// Carries every result, including the successful ones.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{failed} of {} indexing actions failed", .results.len())]
pub struct IndexBatchException {
    failed: usize,
    results: Vec<IndexingResult>,
}

impl IndexBatchException {
    pub fn new(results: Vec<IndexingResult>) -> Self {
        let failed = results.iter().filter(|r| !r.succeeded).count();
        Self { failed, results }
    }

    pub fn results(&self) -> &[IndexingResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<IndexingResult> {
        self.results
    }

    /// The actions of `batch` worth resubmitting; see [`find_failed_actions_to_retry`].
    pub fn find_failed_actions_to_retry<T: Clone>(
        &self,
        batch: &IndexDocumentsBatch<T>,
        key_fn: impl Fn(&T) -> String,
    ) -> IndexDocumentsBatch<T> {
        find_failed_actions_to_retry(batch, &self.results, key_fn)
    }
}
