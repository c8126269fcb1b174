use anyhow::Result;
use clap::Parser;
use tap_cloud_storage::cli::{run, Cli};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries only the run summary.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    let result = run(cli).await;
    match &result {
        Ok(report) => {
            println!(
                "Download complete: {} downloaded, {} unchanged, {} directories skipped",
                report.download.downloaded.len(),
                report.download.unchanged.len(),
                report.download.directories_skipped
            );
            if let Some(path) = &report.state_path {
                println!("State written to {}", path.display());
            }
        }
        Err(e) => tracing::error!(error = %e, "CLI exited with error"),
    }
    result.map(|_| ())
}
