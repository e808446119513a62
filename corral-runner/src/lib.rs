//! corral runner daemon
//!
//! Keeps a fleet of self-hosted CI runner agents alive on one host:
//! - Credentials: registration token, rotation, encrypted cache
//! - Health: resource sampling and ok/degraded/critical evaluation
//! - Sandbox + executor: jobs run in throwaway containers under limits
//! - Agents: one register/poll/execute/report state machine per runner
//! - Fleet: reconciliation, restart policy, global concurrency cap
//! - API: operator status surface

pub mod agent;
pub mod api;
pub mod backoff;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fleet;
pub mod health;
pub mod repository;
pub mod sandbox;
pub mod service;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod testkit;
