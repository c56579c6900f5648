//! # Azure Search Documents
//!
//! Document operations for Azure AI Search, declared as request templates
//! and executed by [`azure_rest_core`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use azure_rest_core::client::RestClient;
//! use azure_search_documents::documents::SearchDocumentsClient;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RestClient::builder()
//!         .endpoint("https://my-service.search.windows.net")
//!         .build()?;
//!     let hotels = SearchDocumentsClient::new(client, "hotels")?;
//!
//!     hotels
//!         .upload_documents([json!({"hotelId": "1", "name": "Fancy Stay"})])
//!         .await?;
//!     println!("{} documents", hotels.count().await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`documents`] - Index, fetch, count and search documents
//! - [`batch`] - Indexing batches and retry classification of failed actions
//! - [`error`] - Error types

pub mod batch;
pub mod documents;
pub mod error;

pub use error::{SearchError, SearchResult};
