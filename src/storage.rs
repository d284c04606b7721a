//! Durable bucket storage
//!
//! One [`BucketStorage`] instance serves one series. It holds one bucket
//! stream per resolution and is the source of truth for watermarks.

use crate::error::StorageError;
use crate::sample::{Resolution, Sample};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

/// Persistence backend for the buckets of one series
pub trait BucketStorage: Send {
    /// Create the storage for a resolution if it does not exist yet
    fn ensure_storage(&mut self, resolution: &Resolution) -> Result<(), StorageError>;

    /// Persist one finalized bucket
    ///
    /// Fails with [`StorageError::DuplicateTick`] if the tick is already
    /// stored. Avoiding duplicates is the caller's job.
    fn persist_bucket(&mut self, resolution: &Resolution, bucket: &Sample)
        -> Result<(), StorageError>;

    /// Up to `max_results` buckets with tick strictly after `after_tick`,
    /// newest first
    fn query_latest(
        &mut self,
        resolution: &Resolution,
        after_tick: u64,
        max_results: usize,
    ) -> Result<Vec<Sample>, StorageError>;

    /// Tick of the newest persisted bucket, if any
    fn last_persisted_tick(&mut self, resolution: &Resolution)
        -> Result<Option<u64>, StorageError>;
}

/// Volatile storage, for tests and dry runs
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    streams: HashMap<String, BTreeMap<u64, Sample>>,
}

impl MemoryStorage {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buckets stored for a resolution
    pub fn len(&self, resolution: &Resolution) -> usize {
        self.streams
            .get(resolution.identifier())
            .map_or(0, BTreeMap::len)
    }

    fn stream(
        &mut self,
        resolution: &Resolution,
    ) -> Result<&mut BTreeMap<u64, Sample>, StorageError> {
        self.streams
            .get_mut(resolution.identifier())
            .ok_or_else(|| StorageError::UnknownResolution(resolution.identifier().to_string()))
    }
}

impl BucketStorage for MemoryStorage {
    fn ensure_storage(&mut self, resolution: &Resolution) -> Result<(), StorageError> {
        self.streams
            .entry(resolution.identifier().to_string())
            .or_default();
        Ok(())
    }

    fn persist_bucket(
        &mut self,
        resolution: &Resolution,
        bucket: &Sample,
    ) -> Result<(), StorageError> {
        let stream = self.stream(resolution)?;
        if stream.contains_key(&bucket.tick) {
            return Err(StorageError::DuplicateTick {
                resolution: resolution.identifier().to_string(),
                tick: bucket.tick,
            });
        }
        stream.insert(bucket.tick, bucket.clone());
        Ok(())
    }

    fn query_latest(
        &mut self,
        resolution: &Resolution,
        after_tick: u64,
        max_results: usize,
    ) -> Result<Vec<Sample>, StorageError> {
        let stream = self.stream(resolution)?;
        Ok(stream
            .range((Bound::Excluded(after_tick), Bound::Unbounded))
            .rev()
            .take(max_results)
            .map(|(_, sample)| sample.clone())
            .collect())
    }

    fn last_persisted_tick(
        &mut self,
        resolution: &Resolution,
    ) -> Result<Option<u64>, StorageError> {
        let stream = self.stream(resolution)?;
        Ok(stream.keys().next_back().copied())
    }
}
