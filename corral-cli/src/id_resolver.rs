//! ID resolver module
//!
//! Lets operators name an agent by a short runner id prefix instead of the
//! full UUID.

use anyhow::{Context, Result, anyhow};
use corral_client::FleetClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve an agent runner id or prefix to a full UUID
///
/// A full UUID is returned as is without asking the daemon.
pub async fn resolve_agent_id(client: &FleetClient, id: &IdOrPrefix) -> Result<Uuid> {
    let prefix = match id {
        IdOrPrefix::Full(uuid) => return Ok(*uuid),
        IdOrPrefix::Prefix(prefix) => prefix,
    };

    let agents = client
        .list_agents()
        .await
        .context("Failed to fetch agents for ID resolution")?;

    match_prefix(prefix, agents.iter().map(|a| a.runner_id))
}

fn match_prefix(prefix: &str, candidates: impl IntoIterator<Item = Uuid>) -> Result<Uuid> {
    if prefix.is_empty() {
        return Err(anyhow!("Agent ID must not be empty"));
    }

    let matches: Vec<Uuid> = candidates
        .into_iter()
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No agent found with ID starting with '{}'", prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(|id| id.to_string()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple agents: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
