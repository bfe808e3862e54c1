//! CLI command implementations

mod config;
mod connect;
mod kill;
mod list;
mod status;

pub use config::{config_init, config_path, config_show};
pub use connect::{connect_batch_command, connect_command, resolve_clusters};
pub use kill::{kill_all_command, kill_command};
pub use list::{clusters_command, list_tunnels_command};
pub use status::status_command;
