//! Runner error taxonomy
//!
//! Every failure a runner agent can meet maps onto one of these kinds. The
//! kind decides what happens next: transient errors are retried with
//! backoff, fatal ones stop the agent from claiming new work.

use corral_client::ClientError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// Token invalid, expired or rejected by the coordinator
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Transport failure or coordinator temporarily unavailable
    #[error("network error: {0}")]
    Network(String),

    /// Another runner won the claim
    #[error("lease conflict: {0}")]
    LeaseConflict(String),

    /// The execution environment failed
    #[error("sandbox error: {0}")]
    Sandbox(String),

    /// Host health is critical
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// A job or a call exceeded its bound
    #[error("timed out: {0}")]
    Timeout(String),

    /// Coordinator answered with something we cannot act on
    #[error("coordinator error: {0}")]
    Coordinator(String),

    /// Local persistence failed
    #[error("storage error: {0}")]
    Storage(String),
}

impl RunnerError {
    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, RunnerError::Network(_) | RunnerError::Timeout(_))
    }

    /// Stops the agent from claiming until the cause recovers
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunnerError::Auth(_) | RunnerError::ResourceExhaustion(_)
        )
    }
}

impl From<ClientError> for RunnerError {
    fn from(err: ClientError) -> Self {
        if err.is_timeout() {
            return RunnerError::Timeout(err.to_string());
        }

        match err.status() {
            Some(401) | Some(403) => RunnerError::Auth(err.to_string()),
            Some(409) => RunnerError::LeaseConflict(err.to_string()),
            Some(408) | Some(429) => RunnerError::Network(err.to_string()),
            Some(status) if status >= 500 => RunnerError::Network(err.to_string()),
            Some(_) => RunnerError::Coordinator(err.to_string()),
            None => match err {
                ClientError::RequestFailed(_) => RunnerError::Network(err.to_string()),
                _ => RunnerError::Coordinator(err.to_string()),
            },
        }
    }
}

impl From<std::io::Error> for RunnerError {
    fn from(err: std::io::Error) -> Self {
        RunnerError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for RunnerError {
    fn from(err: serde_json::Error) -> Self {
        RunnerError::Storage(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for RunnerError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        RunnerError::Timeout(err.to_string())
    }
}
