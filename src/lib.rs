//! Activity Rollups - calendar bucketing and incremental aggregation for
//! per-device activity counters
//!
//! This library provides:
//! - Timezone-aware bucket boundaries from hours to years, DST included
//! - Stable UTC storage keys that survive a user's timezone change
//! - Incremental SUM and running-AVERAGE merges of new contributions
//! - Re-alignment of sparse store results onto complete bucket grids
//! - A narrow async store seam with in-memory and KairosDB adapters
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use activity_rollups::config::Config;
//! use activity_rollups::ingestion::RollupWriter;
//! use activity_rollups::query::RollupReader;
//! use activity_rollups::rollup::BucketSize;
//! use activity_rollups::store::InMemoryStore;
//! use activity_rollups::types::{DataPoint, SeriesKey};
//!
//! # async fn example() -> activity_rollups::Result<()> {
//! let config = Config::default();
//! let store = Arc::new(InMemoryStore::new());
//! let writer = RollupWriter::from_config(store.clone(), &config)?;
//! let reader = RollupReader::new(store, config.rollup.shift()?);
//!
//! let key = SeriesKey::new("steps").with_tag("device", "watch-7");
//! let tz = activity_rollups::rollup::parse_timezone("Asia/Kolkata")?;
//! writer.record(&key, &tz, &[DataPoint::new(1_716_990_310_000, 420i64)]).await?;
//!
//! let days = reader
//!     .read_rollup(&key, &tz, BucketSize::Days, 1_716_900_000_000, None, true)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Pure bucketing, shifting, alignment and merge logic
pub mod rollup;

/// Time-series store seam and adapters
pub mod store;

/// Write path maintaining raw series and rollups
pub mod ingestion;

/// Read path producing aligned bucket series
pub mod query;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Log subscriber setup
pub mod telemetry;

// Re-export main types
pub use error::{Error, Result};
pub use ingestion::RollupWriter;
pub use query::RollupReader;
pub use rollup::{AggregationRule, BucketSize, UtcShift};
pub use store::{InMemoryStore, KairosStore, TimeSeriesStore};
pub use types::{AggregateValue, DataPoint, SeriesKey, TagSet, TimeRange};
