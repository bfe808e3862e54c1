//! List command implementation

use std::collections::HashSet;

use anyhow::Result;

use ktm_core::config::ConfigFile;
use ktm_orchestrator::ManagerState;

use crate::output::{format_clusters, format_tunnels};

/// Execute the list-tunnels command
pub async fn list_tunnels_command(state: &ManagerState, json: bool) -> Result<()> {
    let tunnels = state.store.list_all().await?;

    if json {
        let records: Vec<_> = tunnels.iter().map(|t| &t.tunnel).collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        println!("{}", format_tunnels(&tunnels));
    }

    Ok(())
}

/// Execute the clusters command: list configured clusters
pub async fn clusters_command(config: &ConfigFile, state: &ManagerState, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&config.clusters)?);
        return Ok(());
    }

    let live: HashSet<String> = state
        .store
        .list_all()
        .await?
        .into_iter()
        .map(|t| t.tunnel.context_name)
        .collect();

    println!("{}", format_clusters(&config.clusters, &live));
    Ok(())
}
