//! In-process store with KairosDB query semantics
//!
//! Summed queries behave the way a KairosDB `sum` aggregator does: windows
//! start at the query start and each reported point carries the timestamp of
//! the first point that fell into its window, not the window boundary.
//! Failures can be injected to exercise error paths of callers.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use super::{QueryRequest, SumWindow, TimeSeriesStore};
use crate::error::{Error, Result};
use crate::rollup::calendar::nth_utc_boundary;
use crate::types::{AggregateValue, DataPoint, TagSet};

type SeriesData = BTreeMap<i64, AggregateValue>;

/// Thread-safe in-memory [`TimeSeriesStore`]
#[derive(Debug, Default)]
pub struct InMemoryStore {
    series: RwLock<HashMap<(String, TagSet), SeriesData>>,
    failing_writes: AtomicUsize,
    failing_queries: AtomicUsize,
    writes: AtomicUsize,
    queries: AtomicUsize,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` write calls with an upstream error
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` query calls with an upstream error
    pub fn fail_next_queries(&self, n: usize) {
        self.failing_queries.store(n, Ordering::SeqCst);
    }

    /// Number of successful write calls
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of successful query calls
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// All points of one series, ascending
    pub fn points(&self, series_name: &str, tags: &TagSet) -> Vec<DataPoint> {
        self.series
            .read()
            .get(&(series_name.to_string(), tags.clone()))
            .map(|data| {
                data.iter()
                    .map(|(&timestamp, value)| DataPoint {
                        timestamp,
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of distinct series
    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn collect(&self, request: &QueryRequest) -> Vec<DataPoint> {
        let series = self.series.read();
        let mut points: Vec<DataPoint> = series
            .iter()
            .filter(|((name, tags), _)| *name == request.series_name && request.accepts(tags))
            .flat_map(|(_, data)| {
                data.range(request.range.start..=request.range.end)
                    .map(|(&timestamp, value)| DataPoint {
                        timestamp,
                        value: value.clone(),
                    })
            })
            .collect();
        points.sort_by_key(|p| p.timestamp);
        points
    }
}

/// Sum `points` (ascending) into windows stepped from `start`
fn sum_windows(points: &[DataPoint], start: i64, window: SumWindow) -> Result<Vec<DataPoint>> {
    let mut out: Vec<DataPoint> = Vec::new();
    let mut index = 0u32;
    let mut window_end = nth_utc_boundary(start, window.unit, window.value)?;
    let mut open = false;

    for point in points {
        if point.timestamp >= window_end {
            while point.timestamp >= window_end {
                index += 1;
                let next = index
                    .checked_add(1)
                    .and_then(|n| n.checked_mul(window.value))
                    .ok_or_else(|| Error::invalid("sum window walk overflows"))?;
                window_end = nth_utc_boundary(start, window.unit, next)?;
            }
            open = false;
        }
        if open {
            if let Some(current) = out.last_mut() {
                current.value = add_values(&current.value, &point.value)?;
            }
        } else {
            out.push(DataPoint {
                timestamp: point.timestamp,
                value: add_values(&AggregateValue::Integer(0), &point.value)?,
            });
            open = true;
        }
    }
    Ok(out)
}

fn add_values(a: &AggregateValue, b: &AggregateValue) -> Result<AggregateValue> {
    match (a, b) {
        (AggregateValue::Integer(x), AggregateValue::Integer(y)) => x
            .checked_add(*y)
            .map(AggregateValue::Integer)
            .ok_or_else(|| Error::Upstream("sum aggregator overflowed".into())),
        (AggregateValue::Average(_), _) | (_, AggregateValue::Average(_)) => Err(Error::Upstream(
            "sum aggregator cannot be applied to string values".into(),
        )),
        (x, y) => Ok(AggregateValue::Float(x.as_f64()? + y.as_f64()?)),
    }
}

#[async_trait]
impl TimeSeriesStore for InMemoryStore {
    fn store_id(&self) -> &str {
        "memory"
    }

    async fn query(&self, request: &QueryRequest) -> Result<Vec<DataPoint>> {
        if Self::take_failure(&self.failing_queries) {
            return Err(Error::Upstream("injected query failure".into()));
        }
        let points = self.collect(request);
        let result = match request.sum_window {
            Some(window) => sum_windows(&points, request.range.start, window)?,
            None => points,
        };
        self.queries.fetch_add(1, Ordering::SeqCst);
        debug!(
            series = %request.series_name,
            points = result.len(),
            "in-memory query"
        );
        Ok(result)
    }

    async fn write(&self, series_name: &str, tags: &TagSet, points: &[DataPoint]) -> Result<()> {
        if Self::take_failure(&self.failing_writes) {
            return Err(Error::Upstream("injected write failure".into()));
        }
        let mut series = self.series.write();
        let data = series
            .entry((series_name.to_string(), tags.clone()))
            .or_default();
        for point in points {
            data.insert(point.timestamp, point.value.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
