//! Command-line interface for prompt-eval.
//!
//! Provides commands for seeding prompts and datasets, driving evaluation
//! runs through their lifecycle, and inspecting their status and results.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
