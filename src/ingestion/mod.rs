//! Write path: raw points in, rollup buckets merged
//!
//! ```text
//! [points + tz] → [raw series write] → per level: [bucket → storage key]
//!                                          ↓
//!                         [lock (series, level)] → [query existing]
//!                                          ↓
//!                               [merge] → [write merged buckets]
//! ```

pub mod writer;

pub use writer::{rollup_series_name, RollupWriter, WriteSummary};
