//! Reindex CLI library exports.
//!
//! This crate provides the `reindex` binary.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (reindex, partial, diff, maintenance)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, IndexTarget};
pub use commands::{describe_plan, init_logging, load_settings, run};
