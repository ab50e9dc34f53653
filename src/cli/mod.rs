//! Command line interface module
//!
//! Argument parsing and the runner that executes each subcommand.

pub mod args;
pub mod runner;

pub use args::{Cli, Command};
pub use runner::Runner;
