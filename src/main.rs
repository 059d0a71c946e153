//! Sentinel service binary.

use anyhow::Result;
use clap::Parser;

use sentinel::cli::{self, Cli, Commands};
use sentinel::infrastructure::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let config = cli::load_config(&args)?;
    let _log_guard = init_logging(&config.logging)?;

    match args.command {
        Commands::Run => cli::run_service(config).await,
        Commands::Frameworks => cli::list_frameworks(config).await,
        Commands::Detection { workload_uid } => cli::show_detection(config, &workload_uid).await,
    }
}
