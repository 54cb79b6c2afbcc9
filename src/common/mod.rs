//! Shared infrastructure: errors and command-line arguments

pub mod cli;
pub mod error;

pub use cli::{Cli, Commands, CommonArgs};
pub use error::{ChannelWords, CopperError, CopperResult, Corruption};
