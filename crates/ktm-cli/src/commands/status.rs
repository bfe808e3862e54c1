//! Status command implementation

use anyhow::Result;

use ktm_core::network::NetworkStatus;
use ktm_orchestrator::kubectx::KubeContext;
use ktm_orchestrator::ManagerState;

use crate::output::{format_status_entries, print_info, print_warning};

/// Execute the status command
///
/// Prints every live tunnel and cross-checks the current kubeconfig
/// context against them.
pub async fn status_command(
    state: &ManagerState,
    kube: &dyn KubeContext,
    json: bool,
    require_active: bool,
) -> Result<()> {
    let active = match kube.current().await {
        Ok(active) => active,
        Err(e) => {
            tracing::warn!("Could not read current context: {}", e);
            None
        }
    };

    let report = state.status.report(active.as_deref()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match &report.active_context {
            Some(ctx) => print_info(&format!("Current context: {}", ctx)),
            None => print_info("No current context"),
        }
        println!("{}", format_status_entries(&report.entries, active.as_deref()));

        for warning in &report.warnings {
            print_warning(warning);
        }
        for entry in &report.entries {
            if let NetworkStatus::Unsatisfied {
                hint: Some(hint), ..
            } = &entry.network
            {
                print_info(&format!("{}: {}", entry.context_name, hint));
            }
        }
    }

    if require_active {
        match &report.active_context {
            None => anyhow::bail!("No current kubeconfig context"),
            Some(ctx) if !report.active_is_live() => {
                anyhow::bail!("Current context '{}' has no live tunnel", ctx)
            }
            Some(_) => {}
        }
    }

    Ok(())
}
