//! Sandbox capability
//!
//! Isolation itself is provided by an external container runtime. This
//! module only defines the boundary: run a command under limits, wait for
//! it with a bound, stop it, and stream its output.

pub mod podman;

pub use podman::PodmanSandbox;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Result;

/// Resource limits passed to the runtime
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    /// Memory limit in runtime syntax (e.g., "512m")
    pub memory: Option<String>,
    /// CPU share (e.g., "1.5")
    pub cpus: Option<String>,
    pub pids: Option<u32>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: Some("512m".to_string()),
            cpus: Some("1.0".to_string()),
            pids: Some(512),
        }
    }
}

/// Everything the runtime needs to start one job
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// Unique name for the isolated context
    pub name: String,
    pub image: String,
    /// Run with `sh -c`
    pub command: String,
    pub env: BTreeMap<String, String>,
    pub network: bool,
    pub limits: ResourceLimits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// A slice of job output as it was produced
#[derive(Debug, Clone)]
pub struct LogChunk {
    pub stream: LogStream,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(i32),
    TimedOut,
}

/// Starts isolated execution contexts
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, spec: SandboxSpec) -> Result<Box<dyn SandboxHandle>>;
}

/// A running sandboxed process
#[async_trait]
pub trait SandboxHandle: Send {
    /// Waits up to `timeout` for the process to exit. Cancel safe.
    async fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome>;

    /// Asks the process to stop (SIGTERM)
    async fn terminate(&mut self) -> Result<()>;

    /// Forces the process down (SIGKILL) and returns once it is gone
    async fn kill(&mut self) -> Result<()>;

    /// Output chunks, in order per stream. Only the first call returns
    /// the receiver; it closes when the process has no more output.
    fn logs(&mut self) -> Option<mpsc::Receiver<LogChunk>>;
}
