//! Corral HTTP Clients
//!
//! Type-safe HTTP clients used by the runner daemon and the operator CLI.
//!
//! - [`CoordinatorClient`] speaks the coordinator protocol: registration,
//!   job polling, result reporting, heartbeats and token refresh.
//! - [`FleetClient`] talks to a runner daemon's status API.
//!
//! # Example
//!
//! ```no_run
//! use corral_client::CoordinatorClient;
//! use corral_core::dto::job::PollRequest;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = CoordinatorClient::new("http://localhost:8080");
//!     let request = PollRequest { labels: vec!["self-hosted".into()], capabilities: vec![] };
//!
//!     match client.poll(Uuid::new_v4(), "token", &request).await? {
//!         Some(lease) => println!("Claimed job {}", lease.job_id),
//!         None => println!("Nothing to do"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod fleet;
mod jobs;
mod runners;

pub use error::{ClientError, Result};
pub use fleet::FleetClient;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// HTTP client for the coordinator protocol
///
/// Every call is authenticated with a bearer token passed by the caller,
/// since the token rotates underneath long-lived clients.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    /// Base URL of the coordinator (e.g., "https://ci.example.com")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl CoordinatorClient {
    /// Create a new coordinator client
    ///
    /// # Example
    /// ```
    /// use corral_client::CoordinatorClient;
    ///
    /// let client = CoordinatorClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a client whose requests give up after `timeout`
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    /// Create a new coordinator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the coordinator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

// =============================================================================
// Response Handlers
// =============================================================================

/// Check the status code and deserialize the JSON body
pub(crate) async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let response = check_status(response).await?;

    response
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
}

/// Like `handle_response`, but `204 No Content` means "nothing"
pub(crate) async fn handle_optional_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Option<T>> {
    if response.status() == StatusCode::NO_CONTENT {
        return Ok(None);
    }

    handle_response(response).await.map(Some)
}

/// Check the status code of a response without a body
pub(crate) async fn handle_empty_response(response: reqwest::Response) -> Result<()> {
    check_status(response).await.map(|_| ())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    Ok(response)
}
