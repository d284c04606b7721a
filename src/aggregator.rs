//! Per-resolution bucket folding
//!
//! A [`ResolutionAggregator`] buffers raw samples and closes fixed-width
//! buckets lazily, when a sample arrives more than one period past the
//! watermark. Each closed bucket takes the per-dimension maximum of the
//! samples that fell into it. Source counters only grow during a game, so the
//! maximum is the latest reading in the window.
//!
//! # Invariants
//!
//! - `watermark` never decreases and is always a multiple of the period.
//! - A bucket tick is produced at most once, since it is only ever computed
//!   as `watermark + period` right before the watermark moves past it.
//! - Windows without data are skipped, not stored as zero points.

use crate::error::StorageError;
use crate::sample::{Resolution, Sample};
use std::collections::BTreeMap;

/// Folding state for one resolution of one series
#[derive(Debug, Clone)]
pub struct ResolutionAggregator {
    resolution: Resolution,
    pending: Vec<Sample>,
    watermark: u64,
}

impl ResolutionAggregator {
    /// Create an aggregator resuming from `watermark`
    ///
    /// `seed` is already-durable history (normally the finest resolution's
    /// buckets after this watermark) so a coarser resolution can catch up
    /// without waiting for live data. A watermark that is not a multiple of
    /// the period is aligned down.
    pub fn new(resolution: Resolution, watermark: u64, seed: Vec<Sample>) -> Self {
        let period = resolution.period();
        let mut pending = seed;
        pending.sort_by_key(|s| s.tick);
        Self {
            watermark: watermark - watermark % period,
            resolution,
            pending,
        }
    }

    /// The resolution this aggregator folds into
    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// Tick of the last closed (or skipped) bucket
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Samples not yet folded into a bucket
    pub fn pending(&self) -> &[Sample] {
        &self.pending
    }

    /// Buffer a sample and close every bucket it makes due
    ///
    /// `persist` is called once per finalized bucket, in tick order. If it
    /// fails, the watermark stays before that bucket and its samples remain
    /// pending, so the next call retries it. Buckets persisted before the
    /// failure are still reported in [`Absorbed::finalized`].
    pub fn absorb<F>(&mut self, sample: Sample, mut persist: F) -> Absorbed
    where
        F: FnMut(&Sample) -> Result<(), StorageError>,
    {
        let tick = sample.tick;
        let period = self.resolution.period();
        self.pending.push(sample);

        let mut absorbed = Absorbed::default();
        while tick.saturating_sub(self.watermark) > period {
            let next_tick = self.watermark + period;
            let (due, rest): (Vec<Sample>, Vec<Sample>) = self
                .pending
                .drain(..)
                .partition(|s| s.tick <= next_tick);

            if due.is_empty() {
                self.pending = rest;
                // Jump over the empty windows to the one holding the oldest
                // pending sample.
                let earliest = self.pending.iter().map(|s| s.tick).min().unwrap_or(tick);
                let target = earliest.saturating_sub(1) / period * period;
                log::trace!(
                    "{}: no data in ({}, {}], skipping to {}",
                    self.resolution.identifier(),
                    self.watermark,
                    next_tick,
                    target.max(next_tick)
                );
                self.watermark = target.max(next_tick);
                continue;
            }

            let bucket = Sample::new(next_tick, fold_max(&due));
            if let Err(e) = persist(&bucket) {
                self.pending = due;
                self.pending.extend(rest);
                absorbed.error = Some(e);
                break;
            }

            log::debug!(
                "{}: finalized bucket {} from {} samples",
                self.resolution.identifier(),
                next_tick,
                due.len()
            );
            self.pending = rest;
            self.watermark = next_tick;
            absorbed.finalized.push(bucket);
        }

        absorbed
    }
}

/// Outcome of one [`ResolutionAggregator::absorb`] call
#[derive(Debug, Default)]
pub struct Absorbed {
    /// Buckets persisted by this call, in tick order
    pub finalized: Vec<Sample>,
    /// Persistence failure that stopped the call
    pub error: Option<StorageError>,
}

impl Absorbed {
    /// The finalized buckets, or the failure if persisting stopped early
    pub fn into_result(self) -> Result<Vec<Sample>, StorageError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.finalized),
        }
    }
}

/// Per-dimension maximum across samples
///
/// A dimension missing from every sample is missing from the result.
pub fn fold_max(samples: &[Sample]) -> BTreeMap<String, i64> {
    let mut folded: BTreeMap<String, i64> = BTreeMap::new();
    for sample in samples {
        for (name, &value) in &sample.dimensions {
            folded
                .entry(name.clone())
                .and_modify(|current| *current = (*current).max(value))
                .or_insert(value);
        }
    }
    folded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seconds() -> Resolution {
        Resolution::new(60, "seconds").unwrap()
    }

    fn iron(tick: u64, value: i64) -> Sample {
        Sample::empty(tick).with("in_iron", value)
    }

    fn absorb_all(agg: &mut ResolutionAggregator, samples: Vec<Sample>) -> Vec<Sample> {
        let mut out = Vec::new();
        for sample in samples {
            out.extend(agg.absorb(sample, |_| Ok(())).into_result().unwrap());
        }
        out
    }

    #[test]
    fn test_no_bucket_within_first_period() {
        let mut agg = ResolutionAggregator::new(seconds(), 0, Vec::new());
        let buckets = absorb_all(&mut agg, vec![iron(10, 1), iron(50, 2), iron(60, 3)]);
        assert!(buckets.is_empty());
        assert_eq!(agg.watermark(), 0);
        assert_eq!(agg.pending().len(), 3);
    }

    #[test]
    fn test_basic_collection() {
        let mut agg = ResolutionAggregator::new(seconds(), 0, Vec::new());

        let buckets = absorb_all(&mut agg, vec![iron(10, 5), iron(50, 10)]);
        assert!(buckets.is_empty());

        // Bucket 60 closes with both buffered samples; (60, 120] is empty and
        // skipped.
        let buckets = absorb_all(&mut agg, vec![iron(140, 15)]);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].tick, 60);
        assert_eq!(buckets[0].get("in_iron"), Some(10));
        assert_eq!(agg.watermark(), 120);
        assert_eq!(agg.pending(), &[iron(140, 15)]);
    }

    #[test]
    fn test_bucket_window_is_half_open() {
        let mut agg = ResolutionAggregator::new(seconds(), 0, Vec::new());
        let buckets = absorb_all(
            &mut agg,
            vec![iron(10, 5), iron(70, 10), iron(140, 15), iron(170, 20)],
        );

        let ticks: Vec<u64> = buckets.iter().map(|b| b.tick).collect();
        assert_eq!(ticks, vec![60, 120]);
        assert_eq!(buckets[0].get("in_iron"), Some(5));
        assert_eq!(buckets[1].get("in_iron"), Some(10));
        assert_eq!(agg.watermark(), 120);
        assert_eq!(agg.pending().len(), 2);
    }

    #[test]
    fn test_max_aggregation_and_absent_dimensions() {
        let mut agg = ResolutionAggregator::new(seconds(), 0, Vec::new());
        let samples = vec![
            Sample::empty(10).with("in_iron", 7).with("out_gear", 1),
            Sample::empty(20).with("in_iron", 3),
            Sample::empty(30).with("in_iron", 9).with("out_gear", -4),
            Sample::empty(200),
        ];
        let buckets = absorb_all(&mut agg, samples);

        assert_eq!(buckets.len(), 1);
        let bucket = &buckets[0];
        assert_eq!(bucket.get("in_iron"), Some(9));
        assert_eq!(bucket.get("out_gear"), Some(1));
        assert_eq!(bucket.get("in_copper"), None);
        assert_eq!(bucket.dimensions.len(), 2);
    }

    #[test]
    fn test_gap_skipping_advances_watermark() {
        let mut agg = ResolutionAggregator::new(seconds(), 0, Vec::new());
        absorb_all(&mut agg, vec![iron(30, 1)]);

        // Long outage: only bucket 60 has data, 120 through 600 are skipped.
        let buckets = absorb_all(&mut agg, vec![iron(650, 2)]);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].tick, 60);
        assert_eq!(agg.watermark(), 600);
        assert_eq!(agg.watermark() % 60, 0);

        let buckets = absorb_all(&mut agg, vec![iron(700, 3)]);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].tick, 660);
        assert_eq!(buckets[0].get("in_iron"), Some(2));
    }

    #[test]
    fn test_catch_up_emits_several_buckets() {
        let seed = vec![iron(60, 1), iron(120, 2), iron(180, 3), iron(240, 4)];
        let minutes = Resolution::new(120, "two_seconds").unwrap();
        let mut agg = ResolutionAggregator::new(minutes, 0, seed);

        let buckets = absorb_all(&mut agg, vec![iron(400, 5)]);
        let ticks: Vec<u64> = buckets.iter().map(|b| b.tick).collect();
        assert_eq!(ticks, vec![120, 240]);
        assert_eq!(buckets[0].get("in_iron"), Some(2));
        assert_eq!(buckets[1].get("in_iron"), Some(4));
    }

    #[test]
    fn test_initial_watermark_aligned_down() {
        let agg = ResolutionAggregator::new(seconds(), 130, Vec::new());
        assert_eq!(agg.watermark(), 120);
    }

    #[test]
    fn test_out_of_order_ticks_keep_watermark_monotonic() {
        let mut agg = ResolutionAggregator::new(seconds(), 0, Vec::new());
        let ticks = [500u64, 20, 900, 10, 3, 1300, 1299, 60, 2000, 0];
        let mut last = 0;
        let mut produced = Vec::new();

        for (i, tick) in ticks.iter().enumerate() {
            let buckets = agg
                .absorb(iron(*tick, i as i64), |_| Ok(()))
                .into_result()
                .unwrap();
            produced.extend(buckets.iter().map(|b| b.tick));
            assert!(agg.watermark() >= last);
            assert_eq!(agg.watermark() % 60, 0);
            last = agg.watermark();
        }

        let mut unique = produced.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), produced.len(), "bucket ticks repeated: {:?}", produced);
    }

    #[test]
    fn test_restart_with_lower_ticks_waits() {
        let mut agg = ResolutionAggregator::new(seconds(), 6000, Vec::new());
        let buckets = absorb_all(&mut agg, vec![iron(10, 1), iron(70, 2)]);
        assert!(buckets.is_empty());
        assert_eq!(agg.watermark(), 6000);

        // Old-game samples fold into the first bucket past the watermark.
        let buckets = absorb_all(&mut agg, vec![iron(6100, 3)]);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].tick, 6060);
        assert_eq!(buckets[0].get("in_iron"), Some(2));
    }

    #[test]
    fn test_persist_failure_retries_bucket() {
        let mut agg = ResolutionAggregator::new(seconds(), 0, Vec::new());
        absorb_all(&mut agg, vec![iron(10, 5)]);

        let result = agg.absorb(iron(130, 6), |_| {
            Err(StorageError::Backend("disk full".to_string()))
        });
        assert!(result.finalized.is_empty());
        assert!(result.error.is_some());
        assert_eq!(agg.watermark(), 0);
        assert_eq!(agg.pending().len(), 2);

        let mut persisted = Vec::new();
        let buckets = agg
            .absorb(iron(150, 7), |b| {
                persisted.push(b.tick);
                Ok(())
            })
            .into_result()
            .unwrap();
        assert_eq!(persisted, vec![60]);
        assert_eq!(buckets[0].get("in_iron"), Some(5));
        assert_eq!(agg.watermark(), 120);
    }

    #[test]
    fn test_failure_mid_catch_up_keeps_earlier_buckets() {
        let seed = vec![iron(10, 1), iron(70, 2)];
        let mut agg = ResolutionAggregator::new(seconds(), 0, seed);

        // 200 makes buckets 60 and 120 due; the second write fails.
        let mut writes = 0;
        let result = agg.absorb(iron(200, 3), |_| {
            writes += 1;
            if writes == 2 {
                Err(StorageError::Backend("disk full".to_string()))
            } else {
                Ok(())
            }
        });

        let ticks: Vec<u64> = result.finalized.iter().map(|b| b.tick).collect();
        assert_eq!(ticks, vec![60]);
        assert!(matches!(result.error, Some(StorageError::Backend(_))));
        assert_eq!(agg.watermark(), 60);
        assert_eq!(agg.pending().len(), 2);
    }

    #[test]
    fn test_fold_max_empty() {
        assert!(fold_max(&[]).is_empty());
    }
}
