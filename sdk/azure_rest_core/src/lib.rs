#![doc = include_str!("../README.md")]

pub mod blocking;
pub mod body;
pub mod client;
pub mod decode;
pub mod encoding;
pub mod error;
pub mod exception;
pub mod paging;
pub mod resolve;
pub mod response;
pub mod template;
pub mod transport;

pub use client::RestClient;
pub use error::{RestError, RestResult};

/// Helpers for testing service crates against a mock server.
#[cfg(feature = "test-support")]
pub mod test_support {
    use crate::client::RestClient;
    use wiremock::MockServer;

    /// API version the mock client sends.
    pub const TEST_API_VERSION: &str = "2024-07-01";

    /// Create a test client connected to a mock server.
    pub async fn setup_mock_client(server: &MockServer) -> RestClient {
        RestClient::builder()
            .endpoint(server.uri())
            .api_version(TEST_API_VERSION)
            .build()
            .expect("should build client")
    }
}
