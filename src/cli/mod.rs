//! CLI module - argument parsing and interactive prompts

mod args;
mod prompts;

pub use args::{derive_path, Cli, Commands, SourceArgs};
pub use prompts::*;
