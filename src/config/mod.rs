//! # Configuration
//!
//! Controller settings from environment variables and command line flags.

mod cli;
mod controller;

pub use cli::Cli;
pub use controller::ControllerConfig;
