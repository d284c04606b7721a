// Ferrum Collector - Service entry point
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

use clap::Parser;
use ferrum::{MetricsBridge, ReconnectingClient, SeriesStore};
use ferrum_collector::{
    router, run_scheduler, shutdown_signal, AppState, Args, CollectionJob, FeedHub,
    SqliteStorage,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Ferrum Collector v{}", env!("CARGO_PKG_VERSION"));
    args.validate()?;

    // Storage and history
    let resolutions = args.resolutions()?;
    let storage = SqliteStorage::open(&args.database, &args.series)?;
    let hub = Arc::new(FeedHub::new());
    let store = Arc::new(SeriesStore::new(
        args.series.clone(),
        &resolutions,
        Box::new(storage),
        hub.clone(),
    )?);
    let init_store = Arc::clone(&store);
    tokio::task::spawn_blocking(move || init_store.initialize()).await??;
    info!(
        "Series '{}' ready in {} ({} resolutions)",
        store.name(),
        args.database.display(),
        resolutions.len()
    );

    // Collection
    let client = ReconnectingClient::new(args.console_config())?;
    let job = Arc::new(CollectionJob::new(
        MetricsBridge::new(client),
        Arc::clone(&store),
    ));
    let shutdown = shutdown_signal();
    let scheduler = tokio::spawn(run_scheduler(
        Arc::clone(&job),
        args.interval,
        shutdown.subscribe(),
    ));

    // HTTP and live feed
    let state = Arc::new(AppState::new(vec![store], hub, args.max_history));
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Starting server on http://{}", addr);
    info!("Live feed: ws://{}/feed", addr);

    let listener = TcpListener::bind(addr).await?;
    let mut server_shutdown = shutdown.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.recv().await;
        })
        .await?;

    if let Err(e) = scheduler.await {
        tracing::warn!("Scheduler ended abnormally: {}", e);
    }
    job.bridge().console().close();
    let usage = job.bridge().console().metrics();
    info!(
        "Shut down after {} commands ({} connects, {} failures)",
        usage.commands, usage.connects, usage.failures
    );
    Ok(())
}
