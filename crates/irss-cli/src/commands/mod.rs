//! Command-line surface.

pub mod extract;
pub mod mask_sky;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use irss_models::RunSummary;

use crate::config::ToolConfig;
use crate::error::CliResult;

pub use extract::ExtractArgs;
pub use mask_sky::MaskSkyArgs;

#[derive(Parser, Debug)]
#[command(
    name = "irss",
    version,
    about = "Sky masking and frame extraction for drone imagery"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate binary sky masks for an image or a directory of images
    #[command(alias = "mask_sky")]
    MaskSky(MaskSkyArgs),

    /// Extract frames from a video, optionally tagged with DJI telemetry
    Extract(ExtractArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::MaskSky(_) => "mask-sky",
            Commands::Extract(_) => "extract",
        }
    }
}

/// Run the selected command to completion.
pub async fn dispatch(
    command: Commands,
    config: &ToolConfig,
    cancel: CancellationToken,
) -> CliResult<RunSummary> {
    config.validate()?;
    match command {
        Commands::MaskSky(args) => mask_sky::run(args, config, cancel).await,
        Commands::Extract(args) => extract::run(args, config, cancel).await,
    }
}
