//! Signet Agent - answers remote signing requests under local policy.
//!
//! Wires the `sgn-core` pipeline to file-backed stores, a TOML config and
//! a command line.

pub mod agent;
pub mod cli;
pub mod config;
pub mod logging;
pub mod state;

#[cfg(test)]
mod proptests;

pub use agent::{Agent, SweepOutcome};
pub use cli::Cli;
pub use config::{AgentConfig, ConfigError};
