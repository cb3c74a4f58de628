mod app;
mod cli;
mod server;
mod telemetry;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use crate::app::App;
use crate::cli::Args;
use crate::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let args = Args::parse();

    let _guards = init_telemetry(&args)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Redraft server");

    let result = run_application(args).await;

    if let Err(ref e) = result {
        error!("Application error: {:#}", e);
    }

    info!("Server shutdown complete");

    result
}

async fn run_application(args: Args) -> Result<()> {
    let check_only = args.check_config;
    let app = App::build(args).await?;

    if check_only {
        info!("Configuration is valid");
        return Ok(());
    }

    app.run().await
}
