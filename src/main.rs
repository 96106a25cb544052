use cfcp::cli::{run, Cli};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("CLI arguments parsed, invoking run");

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "CLI exited with error");
        eprintln!("cfcp: {e:#}");
        std::process::exit(1);
    }
}
