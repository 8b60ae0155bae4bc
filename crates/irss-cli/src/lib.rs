//! IRSS command-line tools.
//!
//! `mask-sky` runs the replica-pool sky segmentation pipeline over images;
//! `extract` decodes a video and saves frames under a permit limit.

pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod report;

pub use commands::{dispatch, Cli, Commands};
pub use config::ToolConfig;
pub use error::{CliError, CliResult};
pub use logging::{init_tracing, RunLogger};
