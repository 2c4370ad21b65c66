//! Core data types shared by the bucketing engine and the store adapters
//!
//! # Key Types
//!
//! - **`DataPoint`**: a `(timestamp, value)` pair as read from or written to a store
//! - **`AggregateValue`**: integer, float, or serialized running average
//! - **`TagSet`** / **`SeriesKey`**: metric name plus tags scoping one logical series
//! - **`TimeRange`**: inclusive query window in epoch milliseconds
//! - **`TimeUnit`**: calendar unit vocabulary shared with the store's sum windows
//!
//! # Example
//!
//! ```rust
//! use activity_rollups::types::{AggregateValue, DataPoint, SeriesKey, TimeRange};
//!
//! let key = SeriesKey::new("steps").with_tag("device", "watch-7");
//! let point = DataPoint::new(1_700_000_000_000, AggregateValue::Integer(420));
//!
//! let range = TimeRange::new(1_699_999_000_000, 1_700_001_000_000).unwrap();
//! assert!(range.contains(point.timestamp));
//! assert_eq!(key.tags.get("device").map(String::as_str), Some("watch-7"));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Milliseconds per second
pub const MS_PER_SECOND: i64 = 1_000;
/// Milliseconds per minute
pub const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
/// Milliseconds per hour
pub const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
/// Milliseconds per day (fixed 24h, no DST)
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Calendar unit understood by the store and the bucket engine
///
/// Only `Hours` and coarser units can be used as a bucket size; the finer
/// units exist because the store's sum windows accept them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Milliseconds
    Milliseconds,
    /// Seconds
    Seconds,
    /// Minutes
    Minutes,
    /// Hours
    Hours,
    /// Days
    Days,
    /// Weeks
    Weeks,
    /// Months (variable length)
    Months,
    /// Years (variable length)
    Years,
}

impl TimeUnit {
    /// Wire name, as used by KairosDB sampling units
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Milliseconds => "milliseconds",
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
            TimeUnit::Weeks => "weeks",
            TimeUnit::Months => "months",
            TimeUnit::Years => "years",
        }
    }

    /// Length in milliseconds for units that have a fixed length in UTC
    ///
    /// Returns `None` for months and years.
    pub fn fixed_millis(&self) -> Option<i64> {
        match self {
            TimeUnit::Milliseconds => Some(1),
            TimeUnit::Seconds => Some(MS_PER_SECOND),
            TimeUnit::Minutes => Some(MS_PER_MINUTE),
            TimeUnit::Hours => Some(MS_PER_HOUR),
            TimeUnit::Days => Some(MS_PER_DAY),
            TimeUnit::Weeks => Some(7 * MS_PER_DAY),
            TimeUnit::Months | TimeUnit::Years => None,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let unit = match s.trim().to_ascii_lowercase().as_str() {
            "millisecond" | "milliseconds" | "ms" => TimeUnit::Milliseconds,
            "second" | "seconds" | "s" => TimeUnit::Seconds,
            "minute" | "minutes" | "m" => TimeUnit::Minutes,
            "hour" | "hours" | "h" => TimeUnit::Hours,
            "day" | "days" | "d" => TimeUnit::Days,
            "week" | "weeks" | "w" => TimeUnit::Weeks,
            "month" | "months" => TimeUnit::Months,
            "year" | "years" | "y" => TimeUnit::Years,
            other => return Err(Error::invalid(format!("unknown time unit '{}'", other))),
        };
        Ok(unit)
    }
}

/// Value stored in a raw or aggregated series
///
/// Raw series hold `Integer` or `Float` values. Aggregated series of
/// AVERAGE metrics always hold `Average`, the serialized running average
/// produced by [`crate::rollup::average::encode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggregateValue {
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float
    Float(f64),
    /// Serialized running average `(sum, weight)`
    Average(String),
}

/// Variant of an [`AggregateValue`] without its payload
///
/// Stores that lose the integer/float distinction on the wire (a JSON `3600`
/// may have been written as `3600.0`) use it to decode values back into the
/// variant a series holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// [`AggregateValue::Integer`]
    Integer,
    /// [`AggregateValue::Float`]
    Float,
    /// [`AggregateValue::Average`]
    Average,
}

impl AggregateValue {
    /// Variant of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            AggregateValue::Integer(_) => ValueKind::Integer,
            AggregateValue::Float(_) => ValueKind::Float,
            AggregateValue::Average(_) => ValueKind::Average,
        }
    }

    /// Short name of the variant, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            AggregateValue::Integer(_) => "integer",
            AggregateValue::Float(_) => "float",
            AggregateValue::Average(_) => "running average",
        }
    }

    /// Numeric view of the value
    ///
    /// Running averages are decoded and resolved to their rounded mean.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            AggregateValue::Integer(v) => Ok(*v as f64),
            AggregateValue::Float(v) => Ok(*v),
            AggregateValue::Average(encoded) => crate::rollup::average::average(encoded),
        }
    }
}

impl From<i64> for AggregateValue {
    fn from(v: i64) -> Self {
        AggregateValue::Integer(v)
    }
}

impl From<f64> for AggregateValue {
    fn from(v: f64) -> Self {
        AggregateValue::Float(v)
    }
}

impl fmt::Display for AggregateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateValue::Integer(v) => write!(f, "{}", v),
            AggregateValue::Float(v) => write!(f, "{}", v),
            AggregateValue::Average(s) => f.write_str(s),
        }
    }
}

/// A single `(timestamp, value)` observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Unix timestamp in milliseconds since epoch (UTC)
    pub timestamp: i64,

    /// Observed or aggregated value
    pub value: AggregateValue,
}

impl DataPoint {
    /// Create a new data point
    pub fn new(timestamp: i64, value: impl Into<AggregateValue>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

/// Time range for queries (inclusive on both ends)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp in milliseconds (inclusive)
    pub start: i64,

    /// End timestamp in milliseconds (inclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range, rejecting `start > end`
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(Error::invalid(format!(
                "invalid time range: start {} > end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Check if a timestamp falls within this range (inclusive)
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Duration of this range in milliseconds, `None` on overflow
    pub fn duration_ms(&self) -> Option<i64> {
        self.end.checked_sub(self.start)
    }
}

/// Tag set scoping a series (key-value metadata)
///
/// Backed by an ordered map, so equality and hashing do not depend on the
/// order in which tags were added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet {
    tags: BTreeMap<String, String>,
}

impl TagSet {
    /// Create a new empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tag
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Get a tag value
    pub fn get(&self, key: &str) -> Option<&String> {
        self.tags.get(key)
    }

    /// Iterate tags in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.tags.iter()
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True when no tags are set
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            tags: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Metric name plus tags, uniquely scoping one logical series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    /// Metric name (e.g. `steps`)
    pub metric: String,

    /// Tags (e.g. `device=watch-7`)
    pub tags: TagSet,
}

impl SeriesKey {
    /// Create a key with no tags
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            tags: TagSet::new(),
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key, value);
        self
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.metric)?;
        for (i, (k, v)) in self.tags.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        f.write_str("}")
    }
}
