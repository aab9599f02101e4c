//! Main entry point for the easm-collector CLI

use clap::Parser;
use easm_collector::cli::{Cli, CliError, Commands};
use easm_collector::shutdown::ShutdownCoordinator;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing on stderr; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("easm_collector=info"));

    // stdout may carry events, so logs always go to stderr.
    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - stopping at the next page boundary...");
                shutdown.request_shutdown();
            }
        }
    });

    let result: Result<(), CliError> = match &cli.command {
        Commands::Collect(args) => args.execute(&cli, shutdown.clone()).await,
        Commands::Collections(cmd) => cmd.execute(cli.output_format),
        Commands::Checkpoint(cmd) => cmd.execute(&cli.state_dir, cli.output_format),
        Commands::Validate(cmd) => cmd.execute(cli.config.as_deref(), &cli.state_dir).await,
    };

    if let Err(e) = result {
        let code = e.exit_code();
        error!("Command failed: {:#}", anyhow::Error::new(e));
        std::process::exit(code);
    }
}
