//! Kill command implementations

use anyhow::Result;

use ktm_core::error::TunnelError;
use ktm_orchestrator::{CloseOutcome, ManagerState};

use crate::output::{print_error, print_info, print_success, print_warning};

/// Execute the kill command for the named contexts
///
/// Every context is attempted; the command fails if any context had no
/// tunnel or could not be terminated.
pub async fn kill_command(state: &ManagerState, contexts: &[String]) -> Result<()> {
    if contexts.is_empty() {
        print_error("No contexts specified");
        return Ok(());
    }

    let mut errors = 0;

    for context in contexts {
        match state.supervisor.close(context).await {
            Ok(CloseOutcome::NotRunning) => {
                print_error(&format!("No tunnel running for {}", context));
                errors += 1;
            }
            Ok(outcome) => report_closed(context, outcome),
            Err(e) => {
                print_error(&format!("Failed to close {}: {}", context, e));
                errors += 1;
            }
        }
    }

    if errors > 0 {
        anyhow::bail!("Failed to close {} tunnel(s)", errors);
    }

    Ok(())
}

/// Execute the kill-all command
pub async fn kill_all_command(state: &ManagerState) -> Result<()> {
    let closed = state.supervisor.close_all().await?;
    if closed.is_empty() {
        print_info("No tunnels running");
        return Ok(());
    }

    let mut stopped = 0;
    let mut errors: Vec<TunnelError> = Vec::new();

    for entry in closed {
        match entry.outcome {
            Ok(CloseOutcome::NotRunning) => {
                tracing::debug!("Cleared stale entry {}", entry.context);
            }
            Ok(outcome) => {
                report_closed(&entry.context, outcome);
                stopped += 1;
            }
            Err(e) => {
                print_error(&format!("Failed to close {}: {}", entry.context, e));
                errors.push(e);
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("Failed to close {} tunnel(s)", errors.len());
    }

    print_success(&format!("Closed {} tunnel(s)", stopped));
    Ok(())
}

fn report_closed(context: &str, outcome: CloseOutcome) {
    match outcome {
        CloseOutcome::Terminated { pid } => {
            print_success(&format!("Closed tunnel {} (pid {})", context, pid))
        }
        CloseOutcome::Killed { pid } => print_warning(&format!(
            "Tunnel {} (pid {}) ignored SIGTERM and was killed",
            context, pid
        )),
        CloseOutcome::NotRunning => {}
    }
}
