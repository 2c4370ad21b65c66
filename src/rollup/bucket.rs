//! Calendar bucket boundaries
//!
//! Assigns an arbitrary timestamp to the calendar bucket that encloses it,
//! evaluated in a caller-supplied timezone.
//!
//! # Boundary rules
//!
//! | Size    | Start                                          |
//! |---------|------------------------------------------------|
//! | `Hours` | top of the local hour (instant arithmetic)     |
//! | `Days`  | first instant of the local date                |
//! | `Weeks` | first instant of the local Monday              |
//! | `Months`| first instant of the 1st of the local month    |
//! | `Years` | first instant of January 1st                   |
//!
//! The end of a bucket is one millisecond before the next bucket's start, so
//! a DST transition changes the length of a day bucket but never leaves a gap
//! or overlap between neighbours.
//!
//! # Example
//!
//! ```rust
//! use activity_rollups::rollup::bucket::{bucket_end, bucket_start, BucketSize};
//! use chrono_tz::Tz;
//!
//! // 2024-05-29 13:45:10 UTC
//! let t = 1_716_990_310_000;
//! let start = bucket_start(t, &Tz::UTC, BucketSize::Months).unwrap();
//! let end = bucket_end(start, BucketSize::Months, &Tz::UTC).unwrap();
//!
//! assert_eq!(start, 1_714_521_600_000); // 2024-05-01 00:00:00 UTC
//! assert_eq!(end, 1_717_199_999_999); // 2024-05-31 23:59:59.999 UTC
//! ```

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::calendar::{
    add_units, first_instant_at_or_after, local_naive, offset_transition, utc_offset_ms,
};
use crate::error::{Error, Result};
use crate::types::{TimeUnit, MS_PER_HOUR, MS_PER_MINUTE, MS_PER_SECOND};

/// Size of a pre-aggregation bucket
///
/// Sub-hour sizes are not valid aggregation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BucketSize {
    /// One hour
    Hours,
    /// One calendar day
    Days,
    /// One ISO week, Monday first
    Weeks,
    /// One calendar month
    Months,
    /// One calendar year
    Years,
}

impl BucketSize {
    /// All sizes, finest first
    pub const ALL: [BucketSize; 5] = [
        BucketSize::Hours,
        BucketSize::Days,
        BucketSize::Weeks,
        BucketSize::Months,
        BucketSize::Years,
    ];

    /// The equivalent general time unit
    pub fn unit(&self) -> TimeUnit {
        match self {
            BucketSize::Hours => TimeUnit::Hours,
            BucketSize::Days => TimeUnit::Days,
            BucketSize::Weeks => TimeUnit::Weeks,
            BucketSize::Months => TimeUnit::Months,
            BucketSize::Years => TimeUnit::Years,
        }
    }

    /// Lower-case plural name (`hours`, `days`, ...)
    pub fn as_str(&self) -> &'static str {
        self.unit().as_str()
    }

    /// Suffix of the aggregated series that stores this level
    pub fn series_suffix(&self) -> &'static str {
        match self {
            BucketSize::Hours => "hourly",
            BucketSize::Days => "daily",
            BucketSize::Weeks => "weekly",
            BucketSize::Months => "monthly",
            BucketSize::Years => "yearly",
        }
    }
}

impl TryFrom<TimeUnit> for BucketSize {
    type Error = Error;

    fn try_from(unit: TimeUnit) -> Result<Self> {
        match unit {
            TimeUnit::Hours => Ok(BucketSize::Hours),
            TimeUnit::Days => Ok(BucketSize::Days),
            TimeUnit::Weeks => Ok(BucketSize::Weeks),
            TimeUnit::Months => Ok(BucketSize::Months),
            TimeUnit::Years => Ok(BucketSize::Years),
            TimeUnit::Milliseconds | TimeUnit::Seconds | TimeUnit::Minutes => Err(Error::invalid(
                format!("{} is too fine for pre-aggregation; use hours or coarser", unit),
            )),
        }
    }
}

impl FromStr for BucketSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        BucketSize::try_from(s.parse::<TimeUnit>()?)
    }
}

impl TryFrom<String> for BucketSize {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<BucketSize> for String {
    fn from(size: BucketSize) -> Self {
        size.as_str().to_string()
    }
}

impl fmt::Display for BucketSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A computed bucket, both ends inclusive, in UTC epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBucket {
    /// First millisecond of the bucket
    pub start: i64,
    /// Last millisecond of the bucket (`next_start - 1`)
    pub end: i64,
}

impl TimeBucket {
    /// Check if a timestamp falls within this bucket
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// Local calendar date at which the bucket containing `date` begins
pub(crate) fn anchor_date(date: NaiveDate, size: BucketSize) -> Result<NaiveDate> {
    let anchored = match size {
        BucketSize::Hours | BucketSize::Days => Some(date),
        BucketSize::Weeks => {
            let back = i64::from(date.weekday().num_days_from_monday());
            date.checked_sub_signed(chrono::Duration::days(back))
        }
        BucketSize::Months => date.with_day(1),
        BucketSize::Years => date.with_ordinal(1),
    };
    anchored.ok_or_else(|| Error::invalid(format!("cannot align {} to {}", date, size)))
}

/// Local midnight that opens the calendar bucket containing `naive`
///
/// Only meaningful for `Days` and coarser.
pub(crate) fn calendar_anchor(naive: &NaiveDateTime, size: BucketSize) -> Result<NaiveDateTime> {
    Ok(anchor_date(naive.date(), size)?.and_time(NaiveTime::MIN))
}

/// Start of the bucket of `size` that contains `timestamp`, evaluated in `tz`
pub fn bucket_start(timestamp: i64, tz: &Tz, size: BucketSize) -> Result<i64> {
    let local = local_naive(timestamp, tz)?;
    match size {
        BucketSize::Hours => {
            // Subtract the elapsed part of the local hour. Working on the
            // instant keeps a repeated wall-clock hour as two distinct buckets.
            let top = timestamp - into_local_hour(&local);
            if utc_offset_ms(top, tz)? == utc_offset_ms(timestamp, tz)? {
                Ok(top)
            } else {
                // a sub-hour offset change inside the hour opens a new bucket
                offset_transition(tz, top, timestamp)
            }
        }
        _ => first_instant_at_or_after(tz, &calendar_anchor(&local, size)?),
    }
}

fn into_local_hour(local: &NaiveDateTime) -> i64 {
    i64::from(local.minute()) * MS_PER_MINUTE
        + i64::from(local.second()) * MS_PER_SECOND
        + i64::from(local.nanosecond() / 1_000_000 % 1_000)
}

/// Inclusive end of the bucket that starts at `bucket_start`, evaluated in `tz`
///
/// The timezone here may differ from the one used to compute the start; the
/// storage grid is stepped in UTC while boundary detection uses the caller's
/// zone.
pub fn bucket_end(bucket_start: i64, size: BucketSize, tz: &Tz) -> Result<i64> {
    let next = match size {
        BucketSize::Hours => {
            let top = bucket_start
                .checked_add(MS_PER_HOUR - into_local_hour(&local_naive(bucket_start, tz)?))
                .ok_or_else(|| Error::invalid("bucket end overflows the timestamp range"))?;
            if utc_offset_ms(bucket_start, tz)? == utc_offset_ms(top - 1, tz)? {
                top
            } else {
                offset_transition(tz, bucket_start, top - 1)?
            }
        }
        _ => {
            let anchor = calendar_anchor(&local_naive(bucket_start, tz)?, size)?;
            let next_anchor = add_units(&anchor, size.unit(), 1)?;
            first_instant_at_or_after(tz, &next_anchor)?
        }
    };
    Ok(next - 1)
}

/// The full bucket enclosing `timestamp`
pub fn bucket_for(timestamp: i64, tz: &Tz, size: BucketSize) -> Result<TimeBucket> {
    let start = bucket_start(timestamp, tz, size)?;
    let end = bucket_end(start, size, tz)?;
    Ok(TimeBucket { start, end })
}
