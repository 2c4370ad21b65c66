//! Local bucket boundaries to stable UTC storage keys and back
//!
//! A user's day bucket starts at local midnight, which is a different instant
//! in every timezone. Keying stored rollups on that instant would orphan the
//! data the moment a user moves to another zone. Instead each bucket is placed
//! on a UTC-anchored *grid*: the bucket's local calendar anchor read as a UTC
//! wall clock. `2024-05-29 00:00` in Kolkata and in New York both land on the
//! grid value `2024-05-29T00:00Z`.
//!
//! The storage key is the grid value minus a look-ahead margin. Grid values
//! can run up to the largest UTC offset (+14h) ahead of the instant they
//! describe; subtracting a margin of at least that much guarantees a bucket
//! that has started never receives a key later than now.
//!
//! Hour buckets are keyed by their instant. The local hour boundary already
//! reflects the zone's offset, and repeated wall-clock hours must stay
//! distinct.

use chrono_tz::Tz;
use std::time::Duration;

use super::bucket::{bucket_start, calendar_anchor, BucketSize};
use super::calendar::{
    first_instant_at_or_after, local_naive, naive_as_utc_millis, nth_utc_boundary,
};
use crate::error::{Error, Result};
use crate::types::MS_PER_HOUR;

/// Largest UTC offset magnitude of any supported timezone
pub const MAX_UTC_OFFSET_MS: i64 = 14 * MS_PER_HOUR;

/// Default look-ahead margin
pub const DEFAULT_SHIFT_MARGIN: Duration = Duration::from_secs(14 * 3600);

/// Converts between local bucket starts, grid values and storage keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcShift {
    margin_ms: i64,
}

impl Default for UtcShift {
    fn default() -> Self {
        Self {
            margin_ms: MAX_UTC_OFFSET_MS,
        }
    }
}

impl UtcShift {
    /// Create a transformer with the given look-ahead margin
    ///
    /// The margin must cover the largest UTC offset, otherwise keys for
    /// far-east timezones could lie in the future.
    pub fn new(margin: Duration) -> Result<Self> {
        let margin_ms = i64::try_from(margin.as_millis())
            .map_err(|_| Error::invalid("shift margin is too large"))?;
        if margin_ms < MAX_UTC_OFFSET_MS {
            return Err(Error::invalid(format!(
                "shift margin of {}ms is smaller than the maximum UTC offset of {}ms",
                margin_ms, MAX_UTC_OFFSET_MS
            )));
        }
        Ok(Self { margin_ms })
    }

    /// Create a transformer with a margin in whole hours
    pub fn with_margin_hours(hours: u64) -> Result<Self> {
        let secs = hours
            .checked_mul(3600)
            .ok_or_else(|| Error::invalid("shift margin is too large"))?;
        Self::new(Duration::from_secs(secs))
    }

    /// Look-ahead margin in milliseconds
    pub fn margin_ms(&self) -> i64 {
        self.margin_ms
    }

    /// Grid value of the bucket containing `timestamp` in `tz`
    pub fn to_grid(&self, timestamp: i64, tz: &Tz, size: BucketSize) -> Result<i64> {
        match size {
            BucketSize::Hours => bucket_start(timestamp, tz, size),
            _ => {
                let anchor = calendar_anchor(&local_naive(timestamp, tz)?, size)?;
                Ok(naive_as_utc_millis(&anchor))
            }
        }
    }

    /// Local bucket start for a grid value
    pub fn from_grid(&self, grid: i64, tz: &Tz, size: BucketSize) -> Result<i64> {
        match size {
            BucketSize::Hours => bucket_start(grid, tz, size),
            _ => {
                let anchor = calendar_anchor(&local_naive(grid, &Tz::UTC)?, size)?;
                first_instant_at_or_after(tz, &anchor)
            }
        }
    }

    /// Grid value at which the buckets covering `[.., timestamp)` end
    ///
    /// A timestamp on a bucket boundary maps to that boundary's grid value;
    /// anything inside a bucket rounds up to the following one.
    pub fn grid_end(&self, timestamp: i64, tz: &Tz, size: BucketSize) -> Result<i64> {
        let grid = self.to_grid(timestamp, tz, size)?;
        if bucket_start(timestamp, tz, size)? == timestamp {
            Ok(grid)
        } else {
            nth_utc_boundary(grid, size.unit(), 1)
        }
    }

    /// Storage key of the bucket containing `timestamp` in `tz`
    pub fn to_storage_key(&self, timestamp: i64, tz: &Tz, size: BucketSize) -> Result<i64> {
        self.grid_to_key(self.to_grid(timestamp, tz, size)?)
    }

    /// Local bucket start for a storage key
    pub fn from_storage_key(&self, key: i64, tz: &Tz, size: BucketSize) -> Result<i64> {
        self.from_grid(self.key_to_grid(key)?, tz, size)
    }

    /// Shift a grid value to its storage key
    pub fn grid_to_key(&self, grid: i64) -> Result<i64> {
        grid.checked_sub(self.margin_ms)
            .ok_or_else(|| Error::invalid(format!("grid value {} has no storage key", grid)))
    }

    /// Shift a storage key back onto the grid
    pub fn key_to_grid(&self, key: i64) -> Result<i64> {
        key.checked_add(self.margin_ms)
            .ok_or_else(|| Error::invalid(format!("storage key {} is out of range", key)))
    }
}
