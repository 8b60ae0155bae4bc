//! IRSS command-line entry point.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use irss_cli::{dispatch, init_tracing, Cli, ToolConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = ToolConfig::from_env();
    info!(command = cli.command.name(), "Starting irss");
    info!("Tool config: {:?}", config);

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt; draining admitted items");
            signal.cancel();
        }
    });

    match dispatch(cli.command, &config, cancel).await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                succeeded = summary.succeeded,
                failed = summary.failed(),
                cancelled = summary.cancelled,
                "Done"
            );
        }
        Err(e) => {
            if e.is_setup_fatal() {
                error!("Setup failed: {}", e);
            } else {
                error!("Run failed: {}", e);
            }
            std::process::exit(e.exit_code());
        }
    }
}
