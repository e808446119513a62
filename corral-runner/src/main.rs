//! corral runner daemon
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Credential Store: bootstrap or cached token, rotated in the background
//! - Health Monitor: samples the host on its own timer
//! - Fleet Controller: starts one runner agent per slot and keeps them alive
//! - Status API: read-only fleet view plus stop/clear for operators
//!
//! Runs until SIGTERM/SIGINT, then stops every agent within the shutdown
//! grace before exiting.

use anyhow::{Context, Result};
use corral_core::domain::token::RegistrationToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use corral_runner::agent::AgentDeps;
use corral_runner::api;
use corral_runner::config::Config;
use corral_runner::credentials::{CredentialStore, EncryptionKey, TokenCache};
use corral_runner::fleet::{FleetConfig, FleetController, LocalAgentFactory};
use corral_runner::health::{HealthMonitor, SystemProbe};
use corral_runner::repository::{FileStateStore, HttpCoordinator};
use corral_runner::sandbox::podman::{PodmanSandbox, check_podman_available};
use corral_runner::service::{
    CapabilitiesService, ExecutorConfig, JobExecutor, LogStore, StandardCapabilitiesService,
};
use corral_runner::shutdown::install_shutdown_handler;

const CACHE_KEY_VAR: &str = "CORRAL_CACHE_KEY";
const RECONCILE_INTERVAL: Duration = Duration::from_secs(5);
const LOG_PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "corral_runner=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting corral runner daemon");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: host_id={}, coordinator_url={}, agents={}, max_concurrent_jobs={}",
        config.host_id, config.coordinator_url, config.agent_count, config.max_concurrent_jobs
    );

    check_podman_available().await?;

    tokio::fs::create_dir_all(&config.state_dir)
        .await
        .with_context(|| format!("Failed to create state dir {}", config.state_dir.display()))?;

    let shutdown = install_shutdown_handler()?;

    // Credentials
    let key = match EncryptionKey::from_env(CACHE_KEY_VAR)? {
        Some(key) => key,
        None => EncryptionKey::load_or_create(&config.cache_key_path())
            .context("Failed to load token cache key")?,
    };
    let bootstrap = match &config.registration_token {
        Some(value) => Some(RegistrationToken::issued_now(
            value.clone(),
            chrono::Duration::from_std(config.registration_token_ttl)
                .context("Registration token TTL out of range")?,
        )),
        None => None,
    };
    let credentials = Arc::new(CredentialStore::open(
        config.credentials.clone(),
        Some(TokenCache::new(config.token_cache_path(), &key)),
        bootstrap,
    )?);
    if credentials.get_token().is_err() {
        warn!("No usable registration token; agents stay offline until one is provided");
    }

    let coordinator = Arc::new(HttpCoordinator::new(
        config.coordinator_url.clone(),
        config.request_timeout,
    )?);
    tokio::spawn(
        credentials
            .clone()
            .run_refresh_loop(coordinator.clone(), shutdown.clone()),
    );

    // Health
    let monitor = Arc::new(HealthMonitor::new(
        config.health.clone(),
        Arc::new(SystemProbe::new(config.state_dir.clone())),
    ));
    let health = monitor.subscribe();
    tokio::spawn(monitor.run(shutdown.clone()));

    // Execution
    let logs = Arc::new(LogStore::new(config.logs_dir(), config.log_store.clone()));
    tokio::spawn(logs.clone().run_pruner(LOG_PRUNE_INTERVAL, shutdown.clone()));
    let executor = Arc::new(JobExecutor::new(
        Arc::new(PodmanSandbox::new()),
        logs,
        ExecutorConfig {
            job_timeout: config.job_timeout,
            kill_grace: config.kill_grace,
            default_image: config.sandbox_image.clone(),
        },
    ));

    let capabilities = StandardCapabilitiesService::new(config.capabilities.clone()).discover();

    // Fleet
    let deps = AgentDeps {
        coordinator,
        credentials,
        health,
        executor,
        state_store: Arc::new(FileStateStore::new(config.agents_dir())),
        job_slots: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
    };
    let factory = Arc::new(LocalAgentFactory::new(config.clone(), capabilities, deps));

    let (mut fleet, handle) = FleetController::new(
        FleetConfig {
            max_concurrent_jobs: config.max_concurrent_jobs,
            restart: config.restart.clone(),
            reconcile_interval: RECONCILE_INTERVAL,
            shutdown_timeout: config.shutdown_grace + config.kill_grace + Duration::from_secs(10),
        },
        factory,
    );
    fleet.register_host(&config.host_id, config.agent_count);
    let fleet_task = tokio::spawn(fleet.run(shutdown.clone()));

    // Status API
    let app = api::create_router(handle);
    let listener = tokio::net::TcpListener::bind(&config.status_bind_addr)
        .await
        .with_context(|| format!("Failed to bind status API to {}", config.status_bind_addr))?;
    info!("Status API listening on {}", config.status_bind_addr);

    let api_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { api_shutdown.cancelled().await })
            .await
    });

    fleet_task.await.context("Fleet controller task failed")?;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Status API error: {}", e),
        Err(e) => error!("Status API task failed: {}", e),
    }

    info!("corral runner daemon stopped");
    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}
