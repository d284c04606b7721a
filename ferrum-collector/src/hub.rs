// Ferrum Collector - Live feed hub
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Live feed hub.
//!
//! Fans finalized buckets out to subscribers, one broadcast channel per
//! `series/resolution` stream. Clients see net flow per item rather than the
//! raw `in_`/`out_` counters.

use crate::metrics;
use ferrum::{LiveFeed, Resolution, Sample, CONSUMED_PREFIX, PRODUCED_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::broadcast;

/// Messages buffered per stream before slow subscribers start losing them.
const STREAM_BUFFER_SIZE: usize = 64;

/// A dimension that is neither consumed nor produced
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dimension '{0}' has no in_/out_ prefix")]
pub struct PackError(pub String);

/// One bucket as clients see it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPoint {
    /// Bucket tick
    pub game_tick: u64,
    /// Net flow per item
    pub values: BTreeMap<String, i64>,
}

/// A batch of points for one stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedMessage {
    /// Series name
    pub stream: String,
    /// Resolution identifier
    pub resolution: String,
    /// Points in chronological order
    pub data: Vec<FeedPoint>,
}

/// Fold `in_`/`out_` dimensions into one net value per item
///
/// Consumed counts add, produced counts subtract.
pub fn pack(sample: &Sample) -> Result<FeedPoint, PackError> {
    let mut values: BTreeMap<String, i64> = BTreeMap::new();
    for (name, &value) in &sample.dimensions {
        let (item, signed) = if let Some(item) = name.strip_prefix(CONSUMED_PREFIX) {
            (item, value)
        } else if let Some(item) = name.strip_prefix(PRODUCED_PREFIX) {
            (item, value.saturating_neg())
        } else {
            return Err(PackError(name.clone()));
        };
        let net = values.entry(item.to_string()).or_insert(0);
        *net = net.saturating_add(signed);
    }
    Ok(FeedPoint {
        game_tick: sample.tick,
        values,
    })
}

/// Stream key used by the hub
pub fn stream_key(series: &str, resolution: &str) -> String {
    format!("{}/{}", series, resolution)
}

type Channels = HashMap<String, broadcast::Sender<Arc<FeedMessage>>>;

/// Broadcast hub implementing the live feed
#[derive(Debug, Default)]
pub struct FeedHub {
    channels: RwLock<Channels>,
}

impl FeedHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a stream, creating it on first use.
    pub fn subscribe(
        &self,
        series: &str,
        resolution: &str,
    ) -> broadcast::Receiver<Arc<FeedMessage>> {
        let key = stream_key(series, resolution);
        if let Some(sender) = self.read().get(&key) {
            return sender.subscribe();
        }
        self.write()
            .entry(key)
            .or_insert_with(|| broadcast::channel(STREAM_BUFFER_SIZE).0)
            .subscribe()
    }

    /// Number of live subscribers of a stream.
    pub fn subscriber_count(&self, series: &str, resolution: &str) -> usize {
        self.read()
            .get(&stream_key(series, resolution))
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Push a message to a stream. Returns how many subscribers got it.
    pub fn publish(&self, message: FeedMessage) -> usize {
        let key = stream_key(&message.stream, &message.resolution);
        match self.read().get(&key) {
            Some(sender) => sender.send(Arc::new(message)).unwrap_or(0),
            None => 0,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Channels> {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Channels> {
        self.channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LiveFeed for FeedHub {
    fn on_bucket_finalized(&self, series: &str, resolution: &Resolution, bucket: &Sample) {
        metrics::record_bucket(series, resolution.identifier());

        let point = match pack(bucket) {
            Ok(point) => point,
            Err(e) => {
                metrics::FEED_REJECTED_TOTAL.inc();
                tracing::warn!(
                    series,
                    resolution = resolution.identifier(),
                    "Not publishing bucket {}: {}",
                    bucket.tick,
                    e
                );
                return;
            }
        };

        let delivered = self.publish(FeedMessage {
            stream: series.to_string(),
            resolution: resolution.identifier().to_string(),
            data: vec![point],
        });
        tracing::trace!(
            series,
            resolution = resolution.identifier(),
            tick = bucket.tick,
            delivered,
            "Published bucket"
        );
    }
}
