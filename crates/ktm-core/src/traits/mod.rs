//! Core trait definitions

mod probe;
mod process;
mod transport;

pub use probe::NetworkProbe;
pub use process::ProcessControl;
pub use transport::{ForwardSpec, Transport};
