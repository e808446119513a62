//! Runner daemon configuration
//!
//! Defines every tunable of the daemon: coordinator connection, agent
//! pacing, health thresholds, execution bounds and local storage.
//! Loaded once at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::backoff::RetryPolicy;
use crate::credentials::CredentialConfig;
use crate::fleet::RestartPolicy;
use crate::health::{HealthConfig, HealthThresholds};
use crate::sandbox::ResourceLimits;
use crate::service::LogStoreConfig;

/// What to do with an in-flight job when the agent is forced offline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflinePolicy {
    /// Let the job finish and report, then go offline
    FinishInFlight,
    /// Cancel the job, report it cancelled, then go offline
    CancelInFlight,
}

impl FromStr for OfflinePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "finish" => Ok(OfflinePolicy::FinishInFlight),
            "cancel" => Ok(OfflinePolicy::CancelInFlight),
            other => anyhow::bail!("unknown offline policy '{}'", other),
        }
    }
}

/// Runner daemon configuration
///
/// All timeouts and intervals are configurable so the same binary can run
/// on a Raspberry Pi with a slow SD card or on a beefy build box.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier of this host
    pub host_id: String,

    /// Coordinator base URL (e.g., "https://ci.example.com")
    pub coordinator_url: String,

    /// Bootstrap registration token, used when no cached token exists
    pub registration_token: Option<String>,

    /// Lifetime assumed for the bootstrap token
    pub registration_token_ttl: Duration,

    /// Labels for job matching (e.g., self-hosted, pi4)
    pub labels: Vec<String>,

    /// Extra capabilities on top of discovered ones
    pub capabilities: Vec<String>,

    /// Desired number of agents on this host
    pub agent_count: usize,

    /// Max agents executing a job at the same time, fleet-wide
    pub max_concurrent_jobs: usize,

    /// Base poll interval, used after every successful claim
    pub poll_interval: Duration,

    /// Cap of the poll backoff after repeated empty polls
    pub poll_max_interval: Duration,

    pub heartbeat_interval: Duration,

    /// Bound on every coordinator call
    pub request_timeout: Duration,

    pub health: HealthConfig,

    /// Hard wall-clock bound for a job
    pub job_timeout: Duration,

    /// Time between terminate and kill when stopping a sandbox
    pub kill_grace: Duration,

    /// Time an in-flight job gets to finish on shutdown before it is cancelled
    pub shutdown_grace: Duration,

    pub report_retry: RetryPolicy,

    pub restart: RestartPolicy,

    pub credentials: CredentialConfig,

    /// Root for token cache, agent state and job logs
    pub state_dir: PathBuf,

    pub log_store: LogStoreConfig,

    /// Image used when a job does not name one
    pub sandbox_image: String,

    pub sandbox_limits: ResourceLimits,

    pub offline_policy: OfflinePolicy,

    /// Address of the operator status API
    pub status_bind_addr: String,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(host_id: String, coordinator_url: String) -> Self {
        Self {
            host_id,
            coordinator_url,
            registration_token: None,
            registration_token_ttl: Duration::from_secs(3600),
            labels: Vec::new(),
            capabilities: Vec::new(),
            agent_count: 1,
            max_concurrent_jobs: 1,
            poll_interval: Duration::from_secs(5),
            poll_max_interval: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            health: HealthConfig::default(),
            job_timeout: Duration::from_secs(6 * 3600),
            kill_grace: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(30),
            report_retry: RetryPolicy::default(),
            restart: RestartPolicy::default(),
            credentials: CredentialConfig::default(),
            state_dir: PathBuf::from("/var/lib/corral"),
            log_store: LogStoreConfig::default(),
            sandbox_image: "docker.io/library/debian:stable-slim".to_string(),
            sandbox_limits: ResourceLimits::default(),
            offline_policy: OfflinePolicy::FinishInFlight,
            status_bind_addr: "127.0.0.1:9090".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - COORDINATOR_URL (required)
    /// - HOST_ID (optional, default: system host name)
    /// - REGISTRATION_TOKEN, REGISTRATION_TOKEN_TTL (optional, seconds, default: 3600)
    /// - RUNNER_LABELS, RUNNER_CAPABILITIES (optional, comma separated)
    /// - AGENT_COUNT (optional, default: 1), MAX_CONCURRENT_JOBS (optional, default: 1)
    /// - POLL_INTERVAL, POLL_MAX_INTERVAL (optional, seconds, default: 5 / 60)
    /// - HEARTBEAT_INTERVAL, REQUEST_TIMEOUT (optional, seconds, default: 30 / 30)
    /// - HEALTH_INTERVAL (seconds, default: 30), HEALTH_WINDOW (default: 10)
    /// - TEMP_DEGRADED, TEMP_CRITICAL (celsius, default: 70 / 80)
    /// - MEM_MIN_MB, DISK_MIN_MB, DISK_CRITICAL_MB (default: 256 / 1024 / 256), LOAD_MAX (default: 4.0)
    /// - JOB_TIMEOUT, KILL_GRACE, SHUTDOWN_GRACE (seconds, default: 21600 / 30 / 30)
    /// - REPORT_MAX_ATTEMPTS (default: 5)
    /// - MAX_RESTARTS (default: 5), RESTART_WINDOW (seconds, default: 600)
    /// - STATE_DIR (default: /var/lib/corral)
    /// - SANDBOX_IMAGE, SANDBOX_MEMORY, SANDBOX_CPUS
    /// - OFFLINE_POLICY (finish | cancel, default: finish)
    /// - STATUS_BIND_ADDR (default: 127.0.0.1:9090)
    pub fn from_env() -> anyhow::Result<Self> {
        let coordinator_url = std::env::var("COORDINATOR_URL")
            .map_err(|_| anyhow::anyhow!("COORDINATOR_URL environment variable not set"))?;

        let host_id = std::env::var("HOST_ID").unwrap_or_else(|_| default_host_id());

        let mut config = Self::new(host_id, coordinator_url);

        config.registration_token = std::env::var("REGISTRATION_TOKEN").ok();
        config.registration_token_ttl = env_secs("REGISTRATION_TOKEN_TTL", 3600);
        config.labels = env_list("RUNNER_LABELS");
        config.capabilities = env_list("RUNNER_CAPABILITIES");
        config.agent_count = env_or("AGENT_COUNT", 1);
        config.max_concurrent_jobs = env_or("MAX_CONCURRENT_JOBS", 1);
        config.poll_interval = env_secs("POLL_INTERVAL", 5);
        config.poll_max_interval = env_secs("POLL_MAX_INTERVAL", 60);
        config.heartbeat_interval = env_secs("HEARTBEAT_INTERVAL", 30);
        config.request_timeout = env_secs("REQUEST_TIMEOUT", 30);

        let defaults = HealthThresholds::default();
        config.health = HealthConfig {
            interval: env_secs("HEALTH_INTERVAL", 30),
            window: env_or("HEALTH_WINDOW", 10),
            thresholds: HealthThresholds {
                temp_degraded_c: env_or("TEMP_DEGRADED", defaults.temp_degraded_c),
                temp_critical_c: env_or("TEMP_CRITICAL", defaults.temp_critical_c),
                mem_min_bytes: env_or("MEM_MIN_MB", 256u64) * MIB,
                disk_min_bytes: env_or("DISK_MIN_MB", 1024u64) * MIB,
                disk_critical_bytes: env_or("DISK_CRITICAL_MB", 256u64) * MIB,
                load_max: env_or("LOAD_MAX", defaults.load_max),
                ..defaults
            },
        };

        config.job_timeout = env_secs("JOB_TIMEOUT", 6 * 3600);
        config.kill_grace = env_secs("KILL_GRACE", 30);
        config.shutdown_grace = env_secs("SHUTDOWN_GRACE", 30);
        config.report_retry.max_attempts = env_or("REPORT_MAX_ATTEMPTS", 5);
        config.restart.max_restarts = env_or("MAX_RESTARTS", 5);
        config.restart.window = env_secs("RESTART_WINDOW", 600);

        if let Ok(dir) = std::env::var("STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Ok(image) = std::env::var("SANDBOX_IMAGE") {
            config.sandbox_image = image;
        }
        if let Ok(memory) = std::env::var("SANDBOX_MEMORY") {
            config.sandbox_limits.memory = Some(memory);
        }
        if let Ok(cpus) = std::env::var("SANDBOX_CPUS") {
            config.sandbox_limits.cpus = Some(cpus);
        }
        if let Ok(policy) = std::env::var("OFFLINE_POLICY") {
            config.offline_policy = policy.parse()?;
        }
        if let Ok(addr) = std::env::var("STATUS_BIND_ADDR") {
            config.status_bind_addr = addr;
        }

        Ok(config)
    }

    /// Adds a label for job matching
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    /// Directory holding persisted agent records
    pub fn agents_dir(&self) -> PathBuf {
        self.state_dir.join("agents")
    }

    /// Directory holding job logs
    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    /// Encrypted token cache file
    pub fn token_cache_path(&self) -> PathBuf {
        self.state_dir.join("token.cache")
    }

    /// Key file used when CORRAL_CACHE_KEY is not set
    pub fn cache_key_path(&self) -> PathBuf {
        self.state_dir.join("token.key")
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host_id.trim().is_empty() {
            anyhow::bail!("host_id cannot be empty");
        }

        if self.coordinator_url.is_empty() {
            anyhow::bail!("coordinator_url cannot be empty");
        }

        if !self.coordinator_url.starts_with("http://")
            && !self.coordinator_url.starts_with("https://")
        {
            anyhow::bail!("coordinator_url must start with http:// or https://");
        }

        if self.agent_count == 0 {
            anyhow::bail!("agent_count must be greater than 0");
        }

        if self.max_concurrent_jobs == 0 {
            anyhow::bail!("max_concurrent_jobs must be greater than 0");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.poll_max_interval < self.poll_interval {
            anyhow::bail!("poll_max_interval must not be below poll_interval");
        }

        if self.heartbeat_interval.is_zero() || self.health.interval.is_zero() {
            anyhow::bail!("heartbeat and health intervals must be greater than 0");
        }

        if self.health.window < self.health.thresholds.critical_consecutive {
            anyhow::bail!("health window must hold at least critical_consecutive samples");
        }

        if self.health.thresholds.temp_degraded_c >= self.health.thresholds.temp_critical_c {
            anyhow::bail!("temp_degraded must be below temp_critical");
        }

        if self.job_timeout.is_zero() {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        if self.report_retry.max_attempts == 0 {
            anyhow::bail!("report retry attempts must be greater than 0");
        }

        if !(0.0..1.0).contains(&self.credentials.refresh_fraction) {
            anyhow::bail!("token refresh fraction must be within [0, 1)");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(default_host_id(), "http://localhost:8080".to_string())
    }
}

const MIB: u64 = 1024 * 1024;

fn default_host_id() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string())
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_or(name, default))
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|s| parse_list(&s))
        .unwrap_or_default()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
