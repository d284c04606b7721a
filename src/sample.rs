//! Samples and resolutions
//!
//! A [`Sample`] is one reading of every counter at a game tick. A
//! [`Resolution`] names a bucket width in ticks; series are downsampled into
//! one bucket stream per resolution.

use crate::error::{FerrumError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Game ticks per second
pub const TICKS_PER_SECOND: u64 = 60;

/// Dimension prefix for consumed quantities
pub const CONSUMED_PREFIX: &str = "in_";

/// Dimension prefix for produced quantities
pub const PRODUCED_PREFIX: &str = "out_";

/// Counter values at one game tick
///
/// Samples are immutable once built. They order by tick only; sort with
/// `sort_by_key(|s| s.tick)`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sample {
    /// Game tick the values were read at
    pub tick: u64,
    /// Counter value per dimension name
    pub dimensions: BTreeMap<String, i64>,
}

impl Sample {
    /// Create a sample from a tick and its dimensions
    pub fn new(tick: u64, dimensions: BTreeMap<String, i64>) -> Self {
        Self { tick, dimensions }
    }

    /// Create a sample with no dimensions
    pub fn empty(tick: u64) -> Self {
        Self {
            tick,
            dimensions: BTreeMap::new(),
        }
    }

    /// Add a dimension (builder style)
    pub fn with(mut self, name: impl Into<String>, value: i64) -> Self {
        self.dimensions.insert(name.into(), value);
        self
    }

    /// Value of a dimension
    pub fn get(&self, name: &str) -> Option<i64> {
        self.dimensions.get(name).copied()
    }

    /// Whether the sample carries no dimensions
    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }
}

/// A named bucket width
///
/// Identity is the identifier alone, so a resolution can be looked up by
/// name without knowing its period.
#[derive(Debug, Clone)]
pub struct Resolution {
    period: u64,
    identifier: String,
}

impl Resolution {
    /// Create a resolution of `period` ticks per bucket
    pub fn new(period: u64, identifier: impl Into<String>) -> Result<Self> {
        let identifier = identifier.into();
        if period == 0 {
            return Err(FerrumError::Config(format!(
                "resolution '{}' must have a positive period",
                identifier
            )));
        }
        if identifier.is_empty() {
            return Err(FerrumError::Config(
                "resolution identifier must not be empty".to_string(),
            ));
        }
        Ok(Self { period, identifier })
    }

    /// Ticks per bucket
    pub fn period(&self) -> u64 {
        self.period
    }

    /// Unique name
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The stock resolutions: seconds, ten_seconds, minutes, ten_minutes
    pub fn defaults() -> Vec<Self> {
        [
            (TICKS_PER_SECOND, "seconds"),
            (10 * TICKS_PER_SECOND, "ten_seconds"),
            (60 * TICKS_PER_SECOND, "minutes"),
            (600 * TICKS_PER_SECOND, "ten_minutes"),
        ]
        .into_iter()
        .map(|(period, identifier)| Self {
            period,
            identifier: identifier.to_string(),
        })
        .collect()
    }

    /// Parse `identifier=period`, e.g. `minutes=3600`
    pub fn parse(spec: &str) -> Result<Self> {
        let (identifier, period) = spec.split_once('=').ok_or_else(|| {
            FerrumError::Config(format!(
                "resolution '{}' must look like <identifier>=<ticks>",
                spec
            ))
        })?;
        let period = period.trim().parse::<u64>().map_err(|e| {
            FerrumError::Config(format!("resolution '{}' has an invalid period: {}", spec, e))
        })?;
        Self::new(period, identifier.trim())
    }
}

impl PartialEq for Resolution {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for Resolution {}

impl Hash for Resolution {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} ticks)", self.identifier, self.period)
    }
}

/// Validate a resolution set and sort it by ascending period
///
/// The set must be non-empty with unique identifiers.
pub fn sorted_resolutions(resolutions: &[Resolution]) -> Result<Vec<Resolution>> {
    if resolutions.is_empty() {
        return Err(FerrumError::Config(
            "must support at least one resolution".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for resolution in resolutions {
        if !seen.insert(resolution.identifier()) {
            return Err(FerrumError::Config(format!(
                "duplicate resolution '{}'",
                resolution.identifier()
            )));
        }
    }

    let mut sorted = resolutions.to_vec();
    sorted.sort_by_key(|r| r.period());
    Ok(sorted)
}
