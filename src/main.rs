use std::sync::Arc;
use tracing::info;
use updates_repo::config::load_config;
use updates_repo::{metrics, telemetry, BincodeCodec, RepoConfig, Repository, RocksLog};

/// Wiring/demo harness for the library: loads configuration, opens the
/// RocksDB-backed log, and idles. Real ingestion (a blockchain node feeding
/// the four write operations) and real transport (a gRPC front end over
/// `Repository::stream`) are separate processes this binary does not provide.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1);
    let config: RepoConfig = load_config(config_path.as_deref())?;

    telemetry::init_tracing(config.telemetry.clone())?;
    metrics::register_metrics().ok();

    info!(data_dir = %config.data_dir, "starting updates repository");

    let log = RocksLog::open(&config.data_dir)?;
    let repo = Arc::new(Repository::new(log, BincodeCodec, config));

    metrics::CURRENT_HEIGHT.set(repo.height().await.unwrap_or(0) as i64);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
