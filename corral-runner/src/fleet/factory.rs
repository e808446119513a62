//! Agent construction
//!
//! The controller only knows how to ask for an agent in a slot. The local
//! factory builds a RunnerAgent from the daemon configuration and the
//! shared collaborators; tests substitute their own.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::agent::{AgentConfig, AgentDeps, AgentHandle, RunnerAgent};
use crate::config::Config;
use crate::error::Result;

#[async_trait]
pub trait AgentFactory: Send + Sync {
    /// Starts the agent for `slot` on `host_id`
    async fn start(&self, host_id: &str, slot: usize) -> Result<AgentHandle>;
}

pub struct LocalAgentFactory {
    config: Config,
    capabilities: BTreeSet<String>,
    deps: AgentDeps,
}

impl LocalAgentFactory {
    pub fn new(config: Config, capabilities: BTreeSet<String>, deps: AgentDeps) -> Self {
        Self {
            config,
            capabilities,
            deps,
        }
    }
}

#[async_trait]
impl AgentFactory for LocalAgentFactory {
    async fn start(&self, host_id: &str, slot: usize) -> Result<AgentHandle> {
        let config = AgentConfig::from_config(&self.config, host_id, slot, self.capabilities.clone());
        let agent = RunnerAgent::load(config, self.deps.clone()).await?;
        Ok(agent.spawn())
    }
}
