use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scanline_service::advanced::CommandAdvancedOcr;
use scanline_service::chunking::WindowChunker;
use scanline_service::config::load_config;
use scanline_service::db::Database;
use scanline_service::service::{OcrService, start_worker};
use scanline_service::sources::FsPageSource;
use scanline_service::vision::VisionClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!("Starting Scanline OCR service v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    std::fs::create_dir_all(&config.storage.data_dir)?;

    let db_path = config.storage.database_path();
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    let sources_dir = config.storage.sources_dir();
    let vision = Arc::new(VisionClient::new(config.provider.clone())?);
    let chunker = Arc::new(WindowChunker::new(db.clone(), &config.chunking));
    let advanced =
        CommandAdvancedOcr::from_config(&config.advanced, FsPageSource::new(&sources_dir));

    let mut service = OcrService::new(
        db,
        config,
        vision,
        Arc::new(FsPageSource::new(&sources_dir)),
        chunker,
    );
    match advanced {
        Some(engine) => service = service.with_advanced_ocr(Arc::new(engine)),
        None => warn!("No advanced OCR command configured, advanced jobs will fail"),
    }
    let service = Arc::new(service);

    // Must finish before the worker claims anything
    let report = service.recover()?;
    info!(
        requeued = report.requeued_jobs.len(),
        failed = report.failed_jobs.len(),
        orphaned = report.orphaned_documents.len(),
        "Startup recovery finished"
    );

    let shutdown = CancellationToken::new();
    let worker = start_worker(service, shutdown.clone());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for the current job to finish");
    shutdown.cancel();
    worker.await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("scanline_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
