//! Command-line interface for convolab.
//!
//! Provides commands for running workloads, inspecting their alternative
//! configurations and detecting project events.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
