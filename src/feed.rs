//! Live feed collaborator
//!
//! Finalized buckets are pushed best-effort; delivery is never retried.

use crate::sample::{Resolution, Sample};
use std::sync::Mutex;

/// Receiver of freshly finalized buckets
pub trait LiveFeed: Send + Sync {
    /// Called once per persisted bucket, outside of any series lock
    fn on_bucket_finalized(&self, series: &str, resolution: &Resolution, bucket: &Sample);
}

/// Feed that drops every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFeed;

impl LiveFeed for NullFeed {
    fn on_bucket_finalized(&self, _series: &str, _resolution: &Resolution, _bucket: &Sample) {}
}

/// One recorded notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEvent {
    /// Series name
    pub series: String,
    /// Resolution identifier
    pub resolution: String,
    /// The bucket
    pub bucket: Sample,
}

/// Feed that keeps every notification in memory
#[derive(Debug, Default)]
pub struct RecordingFeed {
    events: Mutex<Vec<FeedEvent>>,
}

impl RecordingFeed {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all events recorded so far
    pub fn drain(&self) -> Vec<FeedEvent> {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *events)
    }
}

impl LiveFeed for RecordingFeed {
    fn on_bucket_finalized(&self, series: &str, resolution: &Resolution, bucket: &Sample) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(FeedEvent {
                series: series.to_string(),
                resolution: resolution.identifier().to_string(),
                bucket: bucket.clone(),
            });
    }
}
