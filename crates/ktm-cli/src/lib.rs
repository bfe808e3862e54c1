//! ktm: command-line front end for the tunnel manager
//!
//! Command implementations and terminal output helpers used by the `ktm`
//! binary.

pub mod commands;
pub mod output;
