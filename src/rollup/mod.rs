//! Bucket alignment and incremental aggregation
//!
//! Pure building blocks shared by the write and read paths.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   raw point (timestamp, tz, value)  │
//! └─────────────────────────────────────┘
//!                  ↓ bucket
//! ┌─────────────────────────────────────┐
//! │   local bucket start per level      │
//! └─────────────────────────────────────┘
//!                  ↓ utc_shift
//! ┌─────────────────────────────────────┐
//! │   stable UTC storage key            │
//! └─────────────────────────────────────┘
//!                  ↓ aggregator (+ average)
//! ┌─────────────────────────────────────┐
//! │   merged value written to the store │
//! └─────────────────────────────────────┘
//! ```
//!
//! On the read side, [`aligner`] fills the store's sparse results into a
//! complete grid and [`utc_shift`] maps grid values back to local starts.
//!
//! Nothing in this module performs I/O, and every function is safe to call
//! from any thread.

pub mod aggregator;
pub mod aligner;
pub mod average;
pub mod bucket;
pub mod calendar;
pub mod utc_shift;

pub use aggregator::AggregationRule;
pub use aligner::{AlignedBucket, AlignedSeries, BucketAligner, BucketValue};
pub use average::RunningAverage;
pub use bucket::{bucket_end, bucket_for, bucket_start, BucketSize, TimeBucket};
pub use calendar::parse_timezone;
pub use utc_shift::UtcShift;
