// Ferrum Collector - Service library
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Ferrum Collector
//!
//! Service around the `ferrum` pipeline: polls a game server on a schedule,
//! keeps multi-resolution history in SQLite, and serves it over HTTP and a
//! WebSocket live feed.
//!
//! ## Usage
//!
//! ```bash
//! ferrum-collector --rcon-host 10.0.0.5 --rcon-password secret --interval 1s
//!
//! # Custom resolutions and HTTP port
//! ferrum-collector --resolution seconds=60,hours=216000 --port 9090
//! ```

pub mod config;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod scheduler;
pub mod server;
pub mod sqlite;

pub use config::Args;
pub use error::{CollectorError, Result};
pub use hub::{FeedHub, FeedMessage, FeedPoint};
pub use scheduler::{run_scheduler, CollectionJob};
pub use server::{router, AppState};
pub use sqlite::SqliteStorage;

use tokio::sync::broadcast;
use tracing::{error, info};

/// Install SIGINT/SIGTERM handlers.
///
/// Returns a sender that fires once when either signal arrives; every part
/// that needs to stop takes its own receiver with `subscribe()`.
pub fn shutdown_signal() -> broadcast::Sender<()> {
    let (tx, _) = broadcast::channel(1);
    let notify = tx.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C)");
            }
            _ = terminate => {
                info!("Received SIGTERM");
            }
        }

        let _ = notify.send(());
    });

    tx
}
