//! Local `claude` CLI integration: subprocess spawning and stream parsing.

pub mod parser;
pub mod runner;

pub use runner::{CliChunk, CliConfig, CliError, CliRunner};
