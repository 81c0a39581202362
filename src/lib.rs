#![warn(clippy::uninlined_format_args)]

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod output;
pub mod prompts;
pub mod runner;

pub use cli::Cli;
pub use error::{Error, Result};
