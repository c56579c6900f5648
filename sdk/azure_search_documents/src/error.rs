//! Error types for the search documents client.

use crate::batch::IndexBatchException;
use azure_rest_core::error::RestError;
use thiserror::Error;

/// Errors returned by [`SearchDocumentsClient`](crate::documents::SearchDocumentsClient).
#[derive(Error, Debug)]
pub enum SearchError {
    /// The request failed in the engine, on the wire, or with an error status.
    #[error("{0}")]
    Rest(#[from] RestError),

    /// At least one action of an indexing batch failed.
    #[error("{0}")]
    IndexBatch(#[from] IndexBatchException),
}

impl SearchError {
    /// HTTP status of the failure, if the service answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rest(err) => err.status(),
            Self::IndexBatch(_) => Some(207),
        }
    }
}

/// Result type alias for search operations.
pub type SearchResult<T> = Result<T, SearchError>;
