//! Connect command implementations

use std::io::Write;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use ktm_core::config::ConfigFile;
use ktm_core::error::ConfigError;
use ktm_core::network::Unsatisfied;
use ktm_core::types::ClusterDescriptor;
use ktm_orchestrator::kubectx::KubeContext;
use ktm_orchestrator::{ManagerState, OrchestratorError};

use crate::output::{format_batch_report, print_error, print_info, print_success, print_warning};

/// Resolve cluster ids or context names against the configured clusters
pub fn resolve_clusters(config: &ConfigFile, keys: &[String]) -> Result<Vec<ClusterDescriptor>> {
    let mut unknown = Vec::new();
    let mut selected = Vec::with_capacity(keys.len());

    for key in keys {
        match config.find_cluster(key) {
            Ok(profile) => selected.push(profile.descriptor()),
            Err(ConfigError::UnknownCluster(_)) => unknown.push(key.as_str()),
            Err(e) => return Err(e.into()),
        }
    }

    if !unknown.is_empty() {
        anyhow::bail!("Unknown cluster(s): {}", unknown.join(", "));
    }
    Ok(selected)
}

/// Execute the connect-batch command
///
/// Connects every selected cluster in order and, unless `no_activate` is
/// set, switches kubeconfig to the first cluster that connected.
pub async fn connect_batch_command(
    config: &ConfigFile,
    state: &ManagerState,
    kube: &dyn KubeContext,
    keys: &[String],
    no_activate: bool,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let selected = resolve_clusters(config, keys)?;

    if !json {
        print_info(&format!("Connecting {} cluster(s)...", selected.len()));
    }
    let report = state.batch.connect_batch_with_cancel(&selected, cancel).await;

    if !no_activate {
        if let Some(active) = &report.active_context {
            if let Err(e) = kube.use_context(active).await {
                print_warning(&format!("Could not switch context to {}: {}", active, e));
            } else if !json {
                print_success(&format!("Switched to context {}", active));
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_batch_report(&report));
    }

    if report.cancelled {
        anyhow::bail!("Interrupted");
    }
    if report.is_total_failure() {
        anyhow::bail!("No clusters connected");
    }
    if report.failed() > 0 {
        anyhow::bail!(
            "{} of {} clusters failed to connect",
            report.failed(),
            report.requested
        );
    }

    Ok(())
}

/// Execute the connect command for a single cluster
///
/// If the cluster's network requirement is not met the user is asked
/// whether to continue; `assume_yes` skips the question.
pub async fn connect_command(
    config: &ConfigFile,
    state: &ManagerState,
    kube: &dyn KubeContext,
    key: &str,
    assume_yes: bool,
    no_activate: bool,
) -> Result<()> {
    let cluster = config.find_cluster(key)?.descriptor();
    let context = cluster.context_name();

    let result = state
        .batch
        .connect_one(&cluster, |unsatisfied| confirm_unsatisfied(unsatisfied, assume_yes))
        .await;

    let record = match result {
        Ok(record) => record,
        Err(OrchestratorError::Aborted(reason)) => {
            print_warning("Aborted");
            anyhow::bail!("Not connected to {}: {}", context, reason);
        }
        Err(e) => {
            print_error(&format!("Failed to connect {}: {}", context, e));
            if let Ok(log) = state.store.log_path(&context) {
                print_info(&format!("Transport log: {}", log.display()));
            }
            return Err(e.into());
        }
    };

    print_success(&format!(
        "Tunnel for {} listening on {} (pid {})",
        context,
        record.local_endpoint(),
        record.handle
    ));

    if !no_activate {
        kube.use_context(&context)
            .await
            .with_context(|| format!("Failed to switch context to {}", context))?;
        print_success(&format!("Switched to context {}", context));
    }

    Ok(())
}

fn confirm_unsatisfied(unsatisfied: &Unsatisfied, assume_yes: bool) -> bool {
    print_warning(&unsatisfied.reason);
    if let Some(hint) = &unsatisfied.hint {
        print_info(&format!("Run: {}", hint));
    }
    if assume_yes {
        return true;
    }

    print!("Continue anyway? [y/N] ");
    if std::io::stdout().flush().is_err() {
        return false;
    }

    let mut input = String::new();
    match std::io::stdin().read_line(&mut input) {
        Ok(_) => input.trim().eq_ignore_ascii_case("y"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ktm_core::config::ClusterProfile;

    fn config() -> ConfigFile {
        let mut config = ConfigFile::default();
        config.clusters = vec![
            ClusterProfile::new("acme", "prod", "10.0.0.5"),
            ClusterProfile::new("acme", "staging", "10.0.0.6"),
        ];
        config
    }

    #[test]
    fn test_resolve_by_id_and_context() {
        let selected = resolve_clusters(
            &config(),
            &["acme:staging".to_string(), "acme-prod".to_string()],
        )
        .unwrap();
        let contexts: Vec<_> = selected.iter().map(|c| c.context_name()).collect();
        assert_eq!(contexts, vec!["acme-staging", "acme-prod"]);
    }

    #[test]
    fn test_resolve_rejects_unknown() {
        let err = resolve_clusters(
            &config(),
            &["acme:prod".to_string(), "other:x".to_string()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("other:x"));
    }

    #[test]
    fn test_resolve_reports_malformed_id() {
        let err = resolve_clusters(&config(), &["acme:".to_string()]).unwrap_err();
        assert!(err.to_string().contains("<group>:<host>"));
    }
}
