//! Re-alignment of store query results onto a canonical bucket grid
//!
//! A summed range query only returns buckets that contain data, and the
//! timestamp the store reports for a bucket is that of its first
//! contributing point rather than the bucket boundary. The aligner rebuilds
//! the complete grid:
//!
//! ```text
//! query  [May 1 ............................................ Aug 1)
//! grid    May 1          Jun 1            Jul 1
//! store       (May 29: 3)                    (Jul 2: 2)
//! result  May 1: 3       Jun 1: 0         Jul 1: 2
//! ```
//!
//! The grid is stepped in UTC. Callers working in a local timezone first map
//! their interval onto the UTC-anchored grid (see [`super::utc_shift`]).
//!
//! Two store points landing in the same grid bucket mean the upstream
//! aggregation did not match the grid. The later point wins; the number of
//! such collisions is reported on the result and logged.

use chrono::Utc;
use tracing::{debug, warn};

use super::bucket::{BucketSize, TimeBucket};
use super::calendar::nth_utc_boundary;
use crate::error::{Error, Result};
use crate::types::AggregateValue;

/// Upper bound on the number of buckets in one aligned series
pub const MAX_ALIGNED_BUCKETS: usize = 1_000_000;

/// A value that can seed an empty bucket
pub trait BucketValue: Clone {
    /// The value of a bucket without data
    fn zero() -> Self;

    /// True if this value is indistinguishable from an empty bucket
    fn is_zero(&self) -> bool;
}

impl BucketValue for i64 {
    fn zero() -> Self {
        0
    }

    fn is_zero(&self) -> bool {
        *self == 0
    }
}

impl BucketValue for f64 {
    fn zero() -> Self {
        0.0
    }

    fn is_zero(&self) -> bool {
        *self == 0.0
    }
}

impl BucketValue for AggregateValue {
    fn zero() -> Self {
        AggregateValue::Integer(0)
    }

    fn is_zero(&self) -> bool {
        match self {
            AggregateValue::Integer(v) => *v == 0,
            AggregateValue::Float(v) => *v == 0.0,
            AggregateValue::Average(encoded) => super::average::decode(encoded)
                .map(|pair| pair.sum == 0.0)
                .unwrap_or(false),
        }
    }
}

/// One bucket of an aligned series
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedBucket<V> {
    /// Canonical bucket start (UTC epoch milliseconds)
    pub start: i64,
    /// Aligned value, zero when the store returned nothing for the bucket
    pub value: V,
}

/// Result of an alignment pass
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedSeries<V> {
    /// Buckets in ascending order
    pub buckets: Vec<AlignedBucket<V>>,
    /// Store points that overwrote an earlier point in the same bucket
    pub collisions: usize,
    /// Store points outside the requested interval, dropped
    pub out_of_range: usize,
}

impl<V> AlignedSeries<V> {
    /// `(start, value)` pairs, convenient for re-alignment and comparisons
    pub fn to_pairs(&self) -> Vec<(i64, V)>
    where
        V: Clone,
    {
        self.buckets
            .iter()
            .map(|b| (b.start, b.value.clone()))
            .collect()
    }
}

/// Canonical bucket starts in `[utc_begin, utc_end)`, stepped in UTC
pub fn canonical_starts(utc_begin: i64, utc_end: i64, size: BucketSize) -> Result<Vec<i64>> {
    if utc_end <= utc_begin {
        return Err(Error::invalid(format!(
            "aligned interval is empty: end {} <= begin {}",
            utc_end, utc_begin
        )));
    }
    let mut starts = Vec::new();
    let mut n = 0u32;
    loop {
        let start = nth_utc_boundary(utc_begin, size.unit(), n)?;
        if start >= utc_end {
            break;
        }
        if starts.len() == MAX_ALIGNED_BUCKETS {
            return Err(Error::invalid(format!(
                "interval spans more than {} {} buckets",
                MAX_ALIGNED_BUCKETS, size
            )));
        }
        starts.push(start);
        n += 1;
    }
    Ok(starts)
}

/// Ranges covered by each canonical start
///
/// Each range ends one millisecond before the next start; the last one ends
/// at `utc_end`.
pub fn canonical_ranges(starts: &[i64], utc_end: i64) -> Vec<TimeBucket> {
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| TimeBucket {
            start,
            end: starts.get(i + 1).map_or(utc_end, |next| next - 1),
        })
        .collect()
}

/// Rebuilds store results onto the canonical grid of one bucket size
#[derive(Debug, Clone, Copy)]
pub struct BucketAligner {
    size: BucketSize,
    sparse: bool,
}

impl BucketAligner {
    /// Create an aligner producing a dense grid
    pub fn new(size: BucketSize) -> Self {
        Self {
            size,
            sparse: false,
        }
    }

    /// Drop zero-valued buckets from the output
    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    /// Bucket size of the grid
    pub fn size(&self) -> BucketSize {
        self.size
    }

    /// Align `points` onto `[utc_begin, utc_end)`, with a missing end meaning now
    pub fn align<V: BucketValue>(
        &self,
        utc_begin: i64,
        utc_end: Option<i64>,
        points: &[(i64, V)],
    ) -> Result<AlignedSeries<V>> {
        self.align_at(utc_begin, utc_end, Utc::now().timestamp_millis(), points)
    }

    /// Same as [`align`](Self::align) with an explicit clock
    pub fn align_at<V: BucketValue>(
        &self,
        utc_begin: i64,
        utc_end: Option<i64>,
        now: i64,
        points: &[(i64, V)],
    ) -> Result<AlignedSeries<V>> {
        let end = utc_end.unwrap_or(now);
        let starts = canonical_starts(utc_begin, end, self.size)?;
        let ranges = canonical_ranges(&starts, end);

        let mut values: Vec<V> = vec![V::zero(); starts.len()];
        let mut filled = vec![false; starts.len()];
        let mut collisions = 0usize;
        let mut out_of_range = 0usize;

        for (timestamp, value) in points {
            // index of the last range starting at or before the point
            let idx = match starts.partition_point(|&s| s <= *timestamp) {
                0 => None,
                n => Some(n - 1),
            };
            match idx {
                Some(i) if ranges[i].contains(*timestamp) => {
                    if filled[i] {
                        collisions += 1;
                    }
                    filled[i] = true;
                    values[i] = value.clone();
                }
                _ => out_of_range += 1,
            }
        }

        if collisions > 0 {
            warn!(
                collisions,
                bucket_size = %self.size,
                "store points shared a bucket; later values overwrote earlier ones"
            );
        }
        if out_of_range > 0 {
            debug!(
                out_of_range,
                utc_begin, end, "dropped store points outside the aligned interval"
            );
        }
        if collisions > 0 || out_of_range > 0 {
            crate::metrics::record_alignment_anomalies(self.size, collisions, out_of_range);
        }

        let buckets = starts
            .into_iter()
            .zip(values)
            .filter(|(_, value)| !(self.sparse && value.is_zero()))
            .map(|(start, value)| AlignedBucket { start, value })
            .collect();

        Ok(AlignedSeries {
            buckets,
            collisions,
            out_of_range,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::calendar::naive_as_utc_millis;
    use chrono::NaiveDate;

    fn utc_ms(y: i32, m: u32, d: u32) -> i64 {
        naive_as_utc_millis(
            &NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> i64 {
        utc_ms(y, m, d) + i64::from(h) * crate::types::MS_PER_HOUR
    }

    #[test]
    fn test_monthly_scenario_dense() {
        let points = vec![(at(2024, 5, 29, 10), 3i64), (at(2024, 7, 2, 8), 2i64)];
        let aligned = BucketAligner::new(BucketSize::Months)
            .align(utc_ms(2024, 5, 1), Some(utc_ms(2024, 8, 1)), &points)
            .unwrap();
        assert_eq!(
            aligned.to_pairs(),
            vec![
                (utc_ms(2024, 5, 1), 3),
                (utc_ms(2024, 6, 1), 0),
                (utc_ms(2024, 7, 1), 2),
            ]
        );
        assert_eq!(aligned.collisions, 0);
    }

    #[test]
    fn test_monthly_scenario_sparse() {
        let points = vec![(at(2024, 5, 29, 10), 3i64), (at(2024, 7, 2, 8), 2i64)];
        let aligned = BucketAligner::new(BucketSize::Months)
            .sparse(true)
            .align(utc_ms(2024, 5, 1), Some(utc_ms(2024, 8, 1)), &points)
            .unwrap();
        assert_eq!(
            aligned.to_pairs(),
            vec![(utc_ms(2024, 5, 1), 3), (utc_ms(2024, 7, 1), 2)]
        );
    }

    #[test]
    fn test_fixed_point() {
        let points = vec![
            (at(2024, 1, 1, 5), 1.5f64),
            (at(2024, 1, 3, 23), 4.0),
            (at(2024, 1, 4, 0), 2.0),
        ];
        let aligner = BucketAligner::new(BucketSize::Days);
        let begin = utc_ms(2024, 1, 1);
        let end = Some(utc_ms(2024, 1, 6));
        let once = aligner.align(begin, end, &points).unwrap();
        let twice = aligner.align(begin, end, &once.to_pairs()).unwrap();
        assert_eq!(once.buckets, twice.buckets);
        assert_eq!(twice.collisions, 0);
    }

    #[test]
    fn test_collisions_are_counted() {
        let points = vec![(at(2024, 5, 2, 0), 1i64), (at(2024, 5, 20, 0), 9i64)];
        let aligned = BucketAligner::new(BucketSize::Months)
            .align(utc_ms(2024, 5, 1), Some(utc_ms(2024, 6, 1)), &points)
            .unwrap();
        assert_eq!(aligned.collisions, 1);
        assert_eq!(aligned.to_pairs(), vec![(utc_ms(2024, 5, 1), 9)]);
    }

    #[test]
    fn test_out_of_range_points_dropped() {
        let points = vec![(utc_ms(2024, 4, 30), 5i64), (utc_ms(2024, 5, 3), 1i64)];
        let aligned = BucketAligner::new(BucketSize::Days)
            .align(utc_ms(2024, 5, 1), Some(utc_ms(2024, 5, 3)), &points)
            .unwrap();
        assert_eq!(aligned.out_of_range, 1);
        // the last range extends to the end bound itself
        assert_eq!(
            aligned.to_pairs(),
            vec![(utc_ms(2024, 5, 1), 0), (utc_ms(2024, 5, 2), 1)]
        );
    }

    #[test]
    fn test_empty_interval_rejected() {
        let aligner = BucketAligner::new(BucketSize::Hours);
        let points: Vec<(i64, i64)> = Vec::new();
        assert!(matches!(
            aligner.align(1000, Some(1000), &points),
            Err(Error::InvalidArgument(_))
        ));
        assert!(aligner.align(1000, Some(10), &points).is_err());
    }

    #[test]
    fn test_open_end_uses_clock() {
        let aligner = BucketAligner::new(BucketSize::Hours);
        let begin = utc_ms(2024, 5, 1);
        let now = begin + 3 * crate::types::MS_PER_HOUR + 5;
        let points = vec![(now, 7i64)];
        let aligned = aligner.align_at(begin, None, now, &points).unwrap();
        assert_eq!(aligned.buckets.len(), 4);
        assert_eq!(aligned.buckets[3].value, 7);
    }

    #[test]
    fn test_canonical_ranges_tile() {
        let starts = canonical_starts(utc_ms(2024, 1, 15), utc_ms(2024, 6, 1), BucketSize::Months)
            .unwrap();
        assert_eq!(starts.len(), 5);
        let ranges = canonical_ranges(&starts, utc_ms(2024, 6, 1));
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].start);
        }
        assert_eq!(ranges.last().unwrap().end, utc_ms(2024, 6, 1));
    }

    #[test]
    fn test_aggregate_value_zero() {
        assert!(AggregateValue::zero().is_zero());
        assert!(AggregateValue::Average(r#"{"sum":0.000,"weight":3}"#.into()).is_zero());
        assert!(!AggregateValue::Average("garbage".into()).is_zero());
        assert!(!AggregateValue::Float(0.5).is_zero());
    }
}
