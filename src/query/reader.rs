//! Rollup and raw reads, aligned onto complete bucket grids

use chrono::Utc;
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ingestion::rollup_series_name;
use crate::rollup::aligner::{AlignedSeries, BucketAligner};
use crate::rollup::{bucket_end, BucketSize, UtcShift};
use crate::store::{QueryRequest, SumWindow, TimeSeriesStore};
use crate::types::{AggregateValue, DataPoint, SeriesKey, TimeRange};

/// One bucket of a rollup read, in the caller's timezone
#[derive(Debug, Clone, PartialEq)]
pub struct RollupBucket {
    /// Local bucket start (UTC epoch milliseconds)
    pub start: i64,
    /// Inclusive bucket end
    pub end: i64,
    /// Stored aggregate, `Integer(0)` for buckets without data
    pub value: AggregateValue,
}

/// Reads rollups written by [`crate::ingestion::RollupWriter`]
pub struct RollupReader {
    store: Arc<dyn TimeSeriesStore>,
    shift: UtcShift,
}

impl RollupReader {
    /// Create a reader; `shift` must match the writer's
    pub fn new(store: Arc<dyn TimeSeriesStore>, shift: UtcShift) -> Self {
        Self { store, shift }
    }

    /// Rollup buckets of `size` covering `[begin, end)` in `tz`
    ///
    /// A missing `end` means now. Buckets that only partly overlap the
    /// interval are included whole.
    pub async fn read_rollup(
        &self,
        key: &SeriesKey,
        tz: &Tz,
        size: BucketSize,
        begin: i64,
        end: Option<i64>,
        sparse: bool,
    ) -> Result<Vec<RollupBucket>> {
        self.read_rollup_at(key, tz, size, begin, end, sparse, Utc::now().timestamp_millis())
            .await
    }

    /// Same as [`read_rollup`](Self::read_rollup) with an explicit clock
    #[allow(clippy::too_many_arguments)]
    pub async fn read_rollup_at(
        &self,
        key: &SeriesKey,
        tz: &Tz,
        size: BucketSize,
        begin: i64,
        end: Option<i64>,
        sparse: bool,
        now: i64,
    ) -> Result<Vec<RollupBucket>> {
        let end = end.unwrap_or(now);
        if end <= begin {
            return Err(Error::invalid(format!(
                "read interval is empty: end {} <= begin {}",
                end, begin
            )));
        }

        let grid_begin = self.shift.to_grid(begin, tz, size)?;
        let grid_end = self.shift.grid_end(end, tz, size)?;
        let range = TimeRange::new(
            self.shift.grid_to_key(grid_begin)?,
            self.shift.grid_to_key(grid_end)? - 1,
        )?;

        let series = rollup_series_name(&key.metric, size);
        let request = QueryRequest::new(series.as_str(), range).series_tags(&key.tags);
        let points = self
            .store
            .query(&request)
            .await?
            .into_iter()
            .map(|p| Ok((self.shift.key_to_grid(p.timestamp)?, p.value)))
            .collect::<Result<Vec<_>>>()?;

        let aligned = BucketAligner::new(size)
            .sparse(sparse)
            .align_at(grid_begin, Some(grid_end), now, &points)?;
        debug!(
            series = %series,
            buckets = aligned.buckets.len(),
            stored = points.len(),
            "rollup read"
        );

        aligned
            .buckets
            .into_iter()
            .map(|bucket| {
                let start = self.shift.from_grid(bucket.start, tz, size)?;
                Ok(RollupBucket {
                    start,
                    end: bucket_end(start, size, tz)?,
                    value: bucket.value,
                })
            })
            .collect()
    }

    /// Raw points summed by the store into UTC buckets of `size`
    ///
    /// The store sums windows starting at `utc_begin`; its results are then
    /// aligned so every bucket in `[utc_begin, utc_end)` appears once.
    pub async fn read_raw_summed(
        &self,
        key: &SeriesKey,
        size: BucketSize,
        utc_begin: i64,
        utc_end: Option<i64>,
        sparse: bool,
    ) -> Result<AlignedSeries<AggregateValue>> {
        let now = Utc::now().timestamp_millis();
        self.read_raw_summed_at(key, size, utc_begin, utc_end, sparse, now)
            .await
    }

    /// Same as [`read_raw_summed`](Self::read_raw_summed) with an explicit clock
    pub async fn read_raw_summed_at(
        &self,
        key: &SeriesKey,
        size: BucketSize,
        utc_begin: i64,
        utc_end: Option<i64>,
        sparse: bool,
        now: i64,
    ) -> Result<AlignedSeries<AggregateValue>> {
        let end = utc_end.unwrap_or(now);
        if end <= utc_begin {
            return Err(Error::invalid(format!(
                "read interval is empty: end {} <= begin {}",
                end, utc_begin
            )));
        }

        let range = TimeRange::new(utc_begin, end - 1)?;
        let request = QueryRequest::new(key.metric.as_str(), range)
            .series_tags(&key.tags)
            .sum_window(SumWindow::new(1, size.unit())?);
        let points: Vec<(i64, AggregateValue)> = self
            .store
            .query(&request)
            .await?
            .into_iter()
            .map(|p| (p.timestamp, p.value))
            .collect();

        BucketAligner::new(size)
            .sparse(sparse)
            .align_at(utc_begin, Some(end), now, &points)
    }

    /// Raw points of a series, unmodified
    pub async fn read_raw(&self, key: &SeriesKey, range: TimeRange) -> Result<Vec<DataPoint>> {
        let request = QueryRequest::new(key.metric.as_str(), range).series_tags(&key.tags);
        self.store.query(&request).await
    }
}
