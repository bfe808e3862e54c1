//! ktm-orchestrator: tunnel supervision and multi-cluster connect
//!
//! Spawns and reaps the SSH processes behind each tunnel, drives batch
//! connects across clusters and assembles status snapshots. All state lives
//! in the `ktm_core` tunnel store; nothing here outlives one invocation.

pub mod batch;
pub mod error;
pub mod kubectx;
pub mod ssh;
pub mod state;
pub mod status;
pub mod supervisor;

pub use batch::{BatchOrchestrator, BatchReport, ConnectionOutcome, ConnectionResult, NetworkWarning};
pub use error::OrchestratorError;
pub use state::ManagerState;
pub use status::{StatusEntry, StatusReport, StatusReporter};
pub use supervisor::{CloseOutcome, TunnelSupervisor};
