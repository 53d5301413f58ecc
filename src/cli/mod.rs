//! CLI module for llmdeploy.
//!
//! This module provides the command-line interface for deploying and
//! operating the LLM service stack.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, TargetArgs};
pub use output::OutputFormatter;
