use clap::Parser;
use contributor_count::cli::{exit_code, run, Cli};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Logs on stderr; stdout is reserved for the report.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("CLI arguments parsed, invoking run");

    let code = match run(cli).await {
        Ok(()) => {
            tracing::info!("CLI completed successfully");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "CLI exited with error");
            eprintln!("Error: {e:#}");
            exit_code(&e)
        }
    };
    std::process::exit(code);
}
