//! Podman sandbox
//!
//! Runs each job in a throwaway `podman run --rm` container and pipes its
//! stdout/stderr back as log chunks.

use anyhow::Context;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{LogChunk, LogStream, Sandbox, SandboxHandle, SandboxSpec, WaitOutcome};
use crate::error::{Result, RunnerError};

const CHUNK_SIZE: usize = 8 * 1024;
const LOG_CHANNEL_DEPTH: usize = 64;

/// Checks if podman is installed and available
pub async fn check_podman_available() -> anyhow::Result<String> {
    let output = Command::new("podman")
        .arg("--version")
        .output()
        .await
        .context("Failed to execute 'podman --version'. Is podman installed?")?;

    if !output.status.success() {
        anyhow::bail!("Podman is not working correctly");
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    info!("Podman is available: {}", version);

    Ok(version)
}

#[derive(Debug, Clone, Default)]
pub struct PodmanSandbox;

impl PodmanSandbox {
    pub fn new() -> Self {
        Self
    }

    fn run_args(spec: &SandboxSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];

        if let Some(memory) = &spec.limits.memory {
            args.push(format!("--memory={}", memory));
        }
        if let Some(cpus) = &spec.limits.cpus {
            args.push(format!("--cpus={}", cpus));
        }
        if let Some(pids) = spec.limits.pids {
            args.push(format!("--pids-limit={}", pids));
        }
        if !spec.network {
            args.push("--network=none".to_string());
        }
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        // Override the image entrypoint so every image runs the command the same way
        args.extend([
            "--entrypoint".to_string(),
            "/bin/sh".to_string(),
            spec.image.clone(),
            "-c".to_string(),
            spec.command.clone(),
        ]);

        args
    }
}

#[async_trait]
impl Sandbox for PodmanSandbox {
    async fn run(&self, spec: SandboxSpec) -> Result<Box<dyn SandboxHandle>> {
        info!("Starting container {} from {}", spec.name, spec.image);

        let mut child = Command::new("podman")
            .args(Self::run_args(&spec))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunnerError::Sandbox(format!("failed to spawn podman: {}", e)))?;

        let (tx, rx) = mpsc::channel(LOG_CHANNEL_DEPTH);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, LogStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, LogStream::Stderr, tx));
        }

        Ok(Box::new(PodmanHandle {
            name: spec.name,
            child,
            logs: Some(rx),
            exit_code: None,
        }))
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, stream: LogStream, tx: mpsc::Sender<LogChunk>) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = LogChunk {
                    stream,
                    data: buf[..n].to_vec(),
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Reading {:?} failed: {}", stream, e);
                break;
            }
        }
    }
}

pub struct PodmanHandle {
    name: String,
    child: Child,
    logs: Option<mpsc::Receiver<LogChunk>>,
    exit_code: Option<i32>,
}

impl PodmanHandle {
    async fn signal(&self, signal: &str) -> Result<()> {
        let output = Command::new("podman")
            .args(["kill", "--signal", signal, &self.name])
            .output()
            .await
            .map_err(|e| RunnerError::Sandbox(format!("failed to run podman kill: {}", e)))?;

        if !output.status.success() {
            // Already gone is fine
            debug!(
                "podman kill --signal {} {}: {}",
                signal,
                self.name,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl SandboxHandle for PodmanHandle {
    async fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome> {
        if let Some(code) = self.exit_code {
            return Ok(WaitOutcome::Exited(code));
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                // Killed by a signal has no code
                let code = status.code().unwrap_or(-1);
                self.exit_code = Some(code);
                Ok(WaitOutcome::Exited(code))
            }
            Ok(Err(e)) => Err(RunnerError::Sandbox(format!(
                "waiting for container {} failed: {}",
                self.name, e
            ))),
            Err(_) => Ok(WaitOutcome::TimedOut),
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.exit_code.is_some() {
            return Ok(());
        }
        self.signal("TERM").await
    }

    async fn kill(&mut self) -> Result<()> {
        if self.exit_code.is_some() {
            return Ok(());
        }

        self.signal("KILL").await?;

        // Take the podman client down too and reap it
        self.child
            .kill()
            .await
            .map_err(|e| RunnerError::Sandbox(format!("failed to kill {}: {}", self.name, e)))?;
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| RunnerError::Sandbox(format!("failed to reap {}: {}", self.name, e)))?;
        self.exit_code = Some(status.code().unwrap_or(-1));
        Ok(())
    }

    fn logs(&mut self) -> Option<mpsc::Receiver<LogChunk>> {
        self.logs.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ResourceLimits;
    use std::collections::BTreeMap;

    fn spec() -> SandboxSpec {
        SandboxSpec {
            name: "corral-test".to_string(),
            image: "alpine:3".to_string(),
            command: "echo hi".to_string(),
            env: BTreeMap::from([("CI".to_string(), "true".to_string())]),
            network: false,
            limits: ResourceLimits::default(),
        }
    }

    #[test]
    fn test_run_args_apply_limits_and_isolation() {
        let args = PodmanSandbox::run_args(&spec());

        assert_eq!(&args[..4], &["run", "--rm", "--name", "corral-test"]);
        assert!(args.contains(&"--memory=512m".to_string()));
        assert!(args.contains(&"--cpus=1.0".to_string()));
        assert!(args.contains(&"--pids-limit=512".to_string()));
        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"CI=true".to_string()));
        assert_eq!(&args[args.len() - 3..], &["alpine:3", "-c", "echo hi"]);
    }

    #[test]
    fn test_run_args_with_network() {
        let mut spec = spec();
        spec.network = true;
        spec.limits = ResourceLimits {
            memory: None,
            cpus: None,
            pids: None,
        };

        let args = PodmanSandbox::run_args(&spec);
        assert!(!args.iter().any(|a| a.starts_with("--network")));
        assert!(!args.iter().any(|a| a.starts_with("--memory")));
    }
}
