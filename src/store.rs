//! Series store
//!
//! A [`SeriesStore`] drives one [`ResolutionAggregator`] per configured
//! resolution of a named series. Writes and reads share one lock, so a reader
//! never sees a watermark that disagrees with what is persisted.
//!
//! # Example
//!
//! ```rust
//! use ferrum::{MemoryStorage, NullFeed, Resolution, Sample, SeriesStore};
//! use std::sync::Arc;
//!
//! let seconds = Resolution::new(60, "seconds").unwrap();
//! let store = SeriesStore::new(
//!     "resources",
//!     &[seconds.clone()],
//!     Box::new(MemoryStorage::new()),
//!     Arc::new(NullFeed),
//! )
//! .unwrap();
//! store.initialize().unwrap();
//!
//! store.store(Sample::empty(10).with("in_iron", 5)).unwrap();
//! store.store(Sample::empty(130).with("in_iron", 9)).unwrap();
//!
//! let latest = store.retrieve(&seconds, 0, 10).unwrap();
//! assert_eq!(latest[0].tick, 60);
//! ```

use crate::aggregator::ResolutionAggregator;
use crate::error::{FerrumError, Result, StorageError};
use crate::feed::LiveFeed;
use crate::sample::{sorted_resolutions, Resolution, Sample};
use crate::storage::BucketStorage;
use std::sync::{Arc, Mutex, MutexGuard};

struct Inner {
    storage: Box<dyn BucketStorage>,
    aggregators: Option<Vec<ResolutionAggregator>>,
}

/// Multi-resolution aggregation pipeline for one series
pub struct SeriesStore {
    name: String,
    resolutions: Vec<Resolution>,
    feed: Arc<dyn LiveFeed>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for SeriesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesStore")
            .field("name", &self.name)
            .field("resolutions", &self.resolutions)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl SeriesStore {
    /// Create a store; nothing is read from storage until [`initialize`]
    ///
    /// The resolution set must be non-empty with unique identifiers.
    ///
    /// [`initialize`]: SeriesStore::initialize
    pub fn new(
        name: impl Into<String>,
        resolutions: &[Resolution],
        storage: Box<dyn BucketStorage>,
        feed: Arc<dyn LiveFeed>,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(FerrumError::Config(
                "series name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            resolutions: sorted_resolutions(resolutions)?,
            name,
            feed,
            inner: Mutex::new(Inner {
                storage,
                aggregators: None,
            }),
        })
    }

    /// Series name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Supported resolutions, finest first
    pub fn resolutions(&self) -> &[Resolution] {
        &self.resolutions
    }

    /// Look up a supported resolution by identifier
    pub fn resolution(&self, identifier: &str) -> Option<&Resolution> {
        self.resolutions
            .iter()
            .find(|r| r.identifier() == identifier)
    }

    /// Whether [`initialize`](SeriesStore::initialize) has completed
    pub fn is_initialized(&self) -> bool {
        self.lock().aggregators.is_some()
    }

    /// Prepare storage and restore aggregation state
    ///
    /// For each resolution, finest first: make sure its storage exists, read
    /// its last persisted tick as the watermark, and seed it with the finest
    /// resolution's buckets past that watermark. Calling this again once it
    /// succeeded does nothing.
    pub fn initialize(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.aggregators.is_some() {
            return Ok(());
        }

        let finest = &self.resolutions[0];
        let mut aggregators = Vec::with_capacity(self.resolutions.len());
        for resolution in &self.resolutions {
            inner.storage.ensure_storage(resolution)?;
            let watermark = inner
                .storage
                .last_persisted_tick(resolution)?
                .unwrap_or(0);
            let seed = inner.storage.query_latest(finest, watermark, usize::MAX)?;

            log::info!(
                "{}/{}: resuming at tick {} with {} seed samples",
                self.name,
                resolution.identifier(),
                watermark,
                seed.len()
            );
            aggregators.push(ResolutionAggregator::new(
                resolution.clone(),
                watermark,
                seed,
            ));
        }

        inner.aggregators = Some(aggregators);
        Ok(())
    }

    /// Feed one raw sample to every resolution
    ///
    /// Finalized buckets are persisted under the lock and announced to the
    /// live feed after it is released. A persistence failure in one
    /// resolution does not stop the others; the first failure is returned
    /// once every bucket that did reach storage has been announced.
    pub fn store(&self, sample: Sample) -> Result<()> {
        let mut finalized = Vec::new();
        let mut first_error = None;
        {
            let mut guard = self.lock();
            let Inner {
                storage,
                aggregators,
            } = &mut *guard;
            let aggregators = aggregators.as_mut().ok_or_else(|| self.not_initialized())?;

            for aggregator in aggregators.iter_mut() {
                let resolution = aggregator.resolution().clone();
                let absorbed = aggregator.absorb(sample.clone(), |bucket| {
                    storage.persist_bucket(&resolution, bucket)
                });
                finalized.extend(
                    absorbed
                        .finalized
                        .into_iter()
                        .map(|b| (resolution.clone(), b)),
                );
                if let Some(e) = absorbed.error {
                    log::warn!(
                        "{}/{}: failed to persist bucket: {}",
                        self.name,
                        resolution.identifier(),
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        for (resolution, bucket) in &finalized {
            self.feed.on_bucket_finalized(&self.name, resolution, bucket);
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Up to `max_results` persisted buckets strictly after `after_tick`,
    /// newest first
    pub fn retrieve(
        &self,
        resolution: &Resolution,
        after_tick: u64,
        max_results: usize,
    ) -> Result<Vec<Sample>> {
        let mut inner = self.lock();
        if inner.aggregators.is_none() {
            return Err(self.not_initialized());
        }
        if !self.resolutions.contains(resolution) {
            return Err(StorageError::UnknownResolution(resolution.identifier().to_string()).into());
        }
        Ok(inner
            .storage
            .query_latest(resolution, after_tick, max_results)?)
    }

    /// Current watermark of a resolution
    pub fn watermark(&self, resolution: &Resolution) -> Result<u64> {
        let inner = self.lock();
        let aggregators = inner
            .aggregators
            .as_ref()
            .ok_or_else(|| self.not_initialized())?;
        aggregators
            .iter()
            .find(|a| a.resolution() == resolution)
            .map(ResolutionAggregator::watermark)
            .ok_or_else(|| {
                StorageError::UnknownResolution(resolution.identifier().to_string()).into()
            })
    }

    fn not_initialized(&self) -> FerrumError {
        FerrumError::NotInitialized {
            series: self.name.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
