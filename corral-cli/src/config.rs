//! Configuration module
//!
//! Handles CLI configuration such as the daemon URL.

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the runner daemon's status API
    pub daemon_url: String,
}
