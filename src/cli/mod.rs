//! Command-line interface for pipeforge.
//!
//! Provides the `run` command driving a search and the `history` command
//! summarizing the result logs of a finished run.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
