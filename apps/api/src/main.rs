mod cache;
mod config;
mod errors;
mod extraction;
mod jobs;
mod processing;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cache::ExtractionCache;
use crate::config::Config;
use crate::extraction::TextExtractionService;
use crate::jobs::{BackgroundProcessor, JobEvent, ProcessingJob};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on malformed env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Resume API v{}", env!("CARGO_PKG_VERSION"));

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("Failed to create upload dir {}", config.upload_dir.display()))?;

    // Extraction cache: Redis when reachable, memory otherwise
    let cache = Arc::new(
        ExtractionCache::connect(config.redis_url.as_deref(), config.cache_ttl_hours).await,
    );

    let extraction = TextExtractionService::new();
    info!(
        "Text extraction ready for: {}",
        extraction.supported_mime_types().join(", ")
    );

    let processor =
        BackgroundProcessor::new(config.processor_config(), extraction.clone(), cache.clone());
    processor.on(JobEvent::Completed, flag_for_review);
    processor.start();

    let state = AppState {
        config: config.clone(),
        processor: processor.clone(),
        extraction,
        cache,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    processor.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Low-quality extractions still complete; they are only surfaced for review.
fn flag_for_review(job: &ProcessingJob) {
    let needs_review = job
        .extraction_result
        .as_ref()
        .and_then(|r| r.metadata.get("ai_ready_data"))
        .and_then(|d| d.pointer("/metadata/quality/needs_manual_review"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if needs_review {
        tracing::warn!(
            job_id = %job.job_id,
            file = %job.original_filename,
            "Extraction quality is low; flagged for manual review"
        );
    }
}
