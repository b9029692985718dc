/// Quill CLI
///
/// Runs a compiled program's `main` or hosts its declared services from the
/// command line, without embedding the engine in another process.
use tracing_subscriber::EnvFilter;

use quill_core::cli;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
