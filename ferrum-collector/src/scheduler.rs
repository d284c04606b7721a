// Ferrum Collector - Collection scheduler
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Periodic collection.
//!
//! One cycle reads a snapshot through the bridge and stores it. Cycles run on
//! the blocking pool since the console client does blocking I/O. A failed
//! cycle is logged and skipped; the next tick tries again.

use crate::metrics;
use ferrum::{FerrumError, MetricsBridge, RemoteConsole, SeriesStore, Snapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Collect-then-store for one series
#[derive(Debug)]
pub struct CollectionJob<C> {
    bridge: MetricsBridge<C>,
    store: Arc<SeriesStore>,
}

impl<C: RemoteConsole> CollectionJob<C> {
    /// Create a job feeding `store` from `bridge`.
    pub fn new(bridge: MetricsBridge<C>, store: Arc<SeriesStore>) -> Self {
        Self { bridge, store }
    }

    /// The bridge this job reads through.
    pub fn bridge(&self) -> &MetricsBridge<C> {
        &self.bridge
    }

    /// The store this job writes to.
    pub fn store(&self) -> &Arc<SeriesStore> {
        &self.store
    }

    /// Run one cycle.
    ///
    /// Paused snapshots are stored too; their tick does not move, so they
    /// never close a bucket.
    pub fn run_once(&self) -> Result<Snapshot, FerrumError> {
        let snapshot = self.bridge.collect()?;
        self.store.store(snapshot.clone().into_sample())?;
        Ok(snapshot)
    }
}

/// Run `job` every `interval` until `shutdown` fires.
pub async fn run_scheduler<C>(
    job: Arc<CollectionJob<C>>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) where
    C: RemoteConsole + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(
        "Collecting {} every {}",
        job.store().name(),
        humantime::format_duration(interval)
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cycle = Arc::clone(&job);
                match tokio::task::spawn_blocking(move || cycle.run_once()).await {
                    Ok(Ok(snapshot)) => {
                        metrics::record_collection(snapshot.game_tick, snapshot.paused);
                        debug!("Collected {}", snapshot);
                    }
                    Ok(Err(e)) => {
                        metrics::record_failure(&e);
                        if e.invalidates_connection() {
                            debug!(kind = e.kind(), "Unable to collect: {}", e);
                        } else {
                            warn!(kind = e.kind(), "Collection failed: {}", e);
                        }
                    }
                    Err(e) => warn!("Collection task aborted: {}", e),
                }
            }
            _ = shutdown.recv() => {
                info!("Stopping collection of {}", job.store().name());
                break;
            }
        }
    }
}
