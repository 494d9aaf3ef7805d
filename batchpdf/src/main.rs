use anyhow::Result;
use batchpdf::cli::{run, Cli};
use batchpdf_core::error::DiscoveryError;
use clap::{error::ErrorKind, CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing for the CLI. RUST_LOG overrides the default level.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    tracing::info!("CLI arguments parsed, invoking run");
    match run(cli).await {
        Ok(_) => {
            tracing::info!("CLI completed successfully");
            Ok(())
        }
        Err(e) if e.downcast_ref::<DiscoveryError>().is_some_and(is_argument_error) => {
            tracing::error!(error = %e, "Invalid arguments");
            Cli::command()
                .error(ErrorKind::ValueValidation, format!("{e:#}"))
                .exit()
        }
        Err(e) => {
            tracing::error!(error = %e, "CLI exited with error");
            Err(e)
        }
    }
}

fn is_argument_error(e: &DiscoveryError) -> bool {
    matches!(e, DiscoveryError::RootUnavailable { .. } | DiscoveryError::InvalidFilter { .. })
}
