//! Monotonic → wall-clock reconciliation
//!
//! The tracer stamps lines with a monotonic nanosecond clock. Once per run a
//! reference pair is captured (`ref_mono`, `ref_wall`, both in seconds) and every
//! timestamp is shifted by the same offset:
//!
//! ```text
//! wall_ns(t) = ref_wall_ns + (t - ref_mono_ns)
//! ```
//!
//! [`ClockReconciler`] is `Copy` and holds no interior state, so it can be
//! handed to any number of correlator threads.

use crate::error::{IngestError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

const NANOS_PER_SEC: f64 = 1e9;

/// Reference timestamps captured when tracing started
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockReference {
    /// Monotonic clock reading, seconds
    #[serde(rename = "ref_mono")]
    pub ref_mono_seconds: f64,
    /// Wall clock reading taken at the same moment, seconds since UNIX epoch
    #[serde(rename = "ref_wall")]
    pub ref_wall_seconds: f64,
}

impl ClockReference {
    /// Load the reference pair from a JSON file
    ///
    /// # Errors
    /// Fails if the file is missing, is not JSON, lacks `ref_mono`/`ref_wall`,
    /// or holds a non-finite value. Any of these aborts the run.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| IngestError::ReferenceRead {
            path: path.to_path_buf(),
            source,
        })?;

        let reference: ClockReference =
            serde_json::from_str(&content).map_err(|e| IngestError::ReferenceInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if !reference.ref_mono_seconds.is_finite() || !reference.ref_wall_seconds.is_finite() {
            return Err(IngestError::ReferenceInvalid {
                path: path.to_path_buf(),
                reason: "reference values must be finite".to_string(),
            });
        }

        Ok(reference)
    }
}

/// Converts tracer monotonic nanoseconds into wall-clock instants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReconciler {
    ref_mono_ns: i64,
    ref_wall_ns: i64,
}

impl ClockReconciler {
    /// Fix the reference pair for the rest of the run
    ///
    /// Seconds are rounded to the nearest nanosecond once; all later arithmetic
    /// is exact.
    pub fn new(reference: ClockReference) -> Self {
        Self {
            ref_mono_ns: seconds_to_nanos(reference.ref_mono_seconds),
            ref_wall_ns: seconds_to_nanos(reference.ref_wall_seconds),
        }
    }

    /// Monotonic reference in nanoseconds
    pub fn ref_mono_ns(&self) -> i64 {
        self.ref_mono_ns
    }

    /// Wall reference in nanoseconds since UNIX epoch
    pub fn ref_wall_ns(&self) -> i64 {
        self.ref_wall_ns
    }

    /// Wall-clock nanoseconds since UNIX epoch for a monotonic timestamp
    pub fn wall_ns(&self, mono_ns: u64) -> i64 {
        let wall = self.ref_wall_ns as i128 + (mono_ns as i128 - self.ref_mono_ns as i128);
        wall.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// Wall-clock instant for a monotonic timestamp
    pub fn wall_time(&self, mono_ns: u64) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.wall_ns(mono_ns))
    }
}

fn seconds_to_nanos(seconds: f64) -> i64 {
    // `as` saturates on overflow
    (seconds * NANOS_PER_SEC).round() as i64
}
