//! Rolling, age-bounded window of moisture samples.
//!
//! Samples are kept in arrival order. Eviction runs on every append and drops
//! anything older than the retention period, except the sample that was just
//! appended, so the window is never empty once it has seen a sample.

use serde::Serialize;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

/// Default maximum age of a retained sample.
pub const DEFAULT_RETENTION: Duration = Duration::minutes(30);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One timestamped moisture reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub value: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Sample {
    pub fn new(value: f64, timestamp: OffsetDateTime) -> Self {
        Self { value, timestamp }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("sample window is empty")]
    Empty,
}

#[derive(Debug, Clone)]
pub struct SampleWindow {
    retention: Duration,
    samples: Vec<Sample>, // arrival order
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SampleWindow {
    /// An empty window. `latest()` fails until the first append.
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            samples: Vec::new(),
        }
    }

    /// A window holding one synthetic zero-value sample stamped `now`.
    pub fn seeded(retention: Duration, now: OffsetDateTime) -> Self {
        let mut window = Self::new(retention);
        window.samples.push(Sample::new(0.0, now));
        window
    }

    /// Append `sample` and evict everything older than `now - retention`.
    /// The sample just appended always survives eviction.
    pub fn append(&mut self, sample: Sample, now: OffsetDateTime) {
        self.samples.push(sample);

        // A retention reaching past the representable range evicts nothing.
        let Some(cutoff) = now.checked_sub(self.retention) else {
            return;
        };
        let newest = self.samples.len() - 1;
        let mut idx = 0;
        self.samples.retain(|s| {
            let keep = idx == newest || s.timestamp >= cutoff;
            idx += 1;
            keep
        });
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The most recently appended sample.
    pub fn latest(&self) -> Result<&Sample, WindowError> {
        self.samples.last().ok_or(WindowError::Empty)
    }

    /// Copy of the retained samples sorted ascending by timestamp. Arrival
    /// order and time order usually agree but clock skew can break that, so
    /// the canonical buffer is never relied on (or mutated) for ordering.
    pub fn snapshot_ordered_by_time(&self) -> Vec<Sample> {
        let mut snapshot = self.samples.clone();
        snapshot.sort_by_key(|s| s.timestamp);
        snapshot
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}

// ===========================================================================
// Tests
// ===========================================================================
