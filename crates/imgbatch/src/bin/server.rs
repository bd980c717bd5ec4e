//! Image batch server binary
//!
//! Run with: cargo run -p imgbatch --bin imgbatch-server

use imgbatch::{config::AppConfig, server::ImageBatchServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (reads .env first so RUST_LOG can live there too)
    let config = AppConfig::load()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imgbatch=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║                    Image Batch Pipeline                   ║
║          CSV Upload -> Fetch -> Recompress -> Publish     ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    tracing::info!("Configuration loaded");
    tracing::info!("  - Database: {}", config.storage.database_path().display());
    tracing::info!("  - Static dir: {}", config.storage.static_dir.display());
    tracing::info!("  - Public base URL: {}", config.storage.public_base_url);
    tracing::info!("  - JPEG quality: {}", config.image.quality);
    tracing::info!("  - Fetch timeout: {}s", config.fetch.timeout_secs);
    tracing::info!(
        "  - Concurrency: {} records, {} URLs per record",
        config.processing.effective_concurrency(),
        config.processing.url_concurrency
    );

    // Create and start server
    let server = ImageBatchServer::new(config).await?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("\nEndpoints:");
    println!("  POST /upload              - Upload a product CSV (multipart field 'file')");
    println!("  GET  /status/:request_id  - Record status for a batch");
    println!("  GET  /jobs                - Batch progress and queue stats");
    println!("  GET  /static/:name        - Published images");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
