//! Read-modify-write of rollup buckets
//!
//! For every configured level the writer buckets each raw point in the
//! caller's timezone, maps the bucket to its storage key, reads the value
//! already stored under that key and writes back the merged aggregate.
//!
//! Merges for one `(series, level)` pair are serialized by an async mutex
//! held across the read and the write, so two concurrent batches for the
//! same series never lose each other's contribution. Different series and
//! different levels proceed in parallel.

use chrono_tz::Tz;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, MetricDefinition};
use crate::error::{Error, Result};
use crate::metrics;
use crate::rollup::aggregator::{fold, initial_value, AggregationRule};
use crate::rollup::{BucketSize, UtcShift};
use crate::store::{QueryRequest, TimeSeriesStore};
use crate::types::{AggregateValue, DataPoint, SeriesKey, TimeRange, ValueKind};

type LockKey = (SeriesKey, BucketSize);

/// Name of the series holding `metric` rolled up at `level`
pub fn rollup_series_name(metric: &str, level: BucketSize) -> String {
    format!("{}_{}", metric, level.series_suffix())
}

/// Outcome of one [`RollupWriter::record`] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Raw points written
    pub raw_points: usize,
    /// Buckets written per level, in level order
    pub buckets: Vec<(BucketSize, usize)>,
}

/// Maintains raw series and their rollups
pub struct RollupWriter {
    store: Arc<dyn TimeSeriesStore>,
    levels: Vec<BucketSize>,
    shift: UtcShift,
    rules: HashMap<String, AggregationRule>,
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl RollupWriter {
    /// Create a writer for the given levels and metrics
    pub fn new(
        store: Arc<dyn TimeSeriesStore>,
        levels: Vec<BucketSize>,
        shift: UtcShift,
        metrics: &[MetricDefinition],
    ) -> Self {
        let rules = metrics
            .iter()
            .map(|m| (m.name.clone(), m.rule))
            .collect();
        Self {
            store,
            levels,
            shift,
            rules,
            locks: DashMap::new(),
        }
    }

    /// Create a writer from configuration
    pub fn from_config(store: Arc<dyn TimeSeriesStore>, config: &Config) -> Result<Self> {
        config.validate()?;
        let shift = config.rollup.shift()?;
        metrics::set_enabled(config.monitoring.metrics_enabled);
        info!(
            store = store.store_id(),
            levels = config.rollup.levels.len(),
            metrics = config.metrics.len(),
            "rollup writer ready"
        );
        Ok(Self::new(store, config.rollup.levels.clone(), shift, &config.metrics))
    }

    /// Rollup levels maintained by this writer
    pub fn levels(&self) -> &[BucketSize] {
        &self.levels
    }

    /// Aggregation rule of a metric
    pub fn rule(&self, metric: &str) -> Result<AggregationRule> {
        self.rules
            .get(metric)
            .copied()
            .ok_or_else(|| Error::invalid(format!("metric '{}' is not configured", metric)))
    }

    /// Write raw points and fold them into every rollup level
    ///
    /// Everything that can be checked without the store is checked before
    /// the first write: every point must be a valid contribution, and so
    /// must the batch as a whole, so a SUM batch mixing integers and floats
    /// is rejected up front. A store failure stops the call: levels after
    /// the failing one are left untouched and the failing level writes
    /// nothing.
    pub async fn record(
        &self,
        key: &SeriesKey,
        tz: &Tz,
        points: &[DataPoint],
    ) -> Result<WriteSummary> {
        let rule = self.rule(&key.metric)?;
        if points.is_empty() {
            return Ok(WriteSummary::default());
        }
        for point in points {
            initial_value(&point.value, rule)?;
        }
        let first = &points[0].value;
        if let Some(other) = points.iter().find(|p| p.value.kind() != first.kind()) {
            return Err(Error::mismatch(first.kind_name(), other.value.kind_name()));
        }

        let mut plans = Vec::with_capacity(self.levels.len());
        for &level in &self.levels {
            let groups = self.group_by_key(points, tz, level)?;
            for contributions in groups.values() {
                fold(None, contributions.iter().copied(), rule)?;
            }
            plans.push((level, groups));
        }

        self.store.write(&key.metric, &key.tags, points).await?;
        let mut summary = WriteSummary {
            raw_points: points.len(),
            buckets: Vec::with_capacity(plans.len()),
        };

        for (level, groups) in plans {
            let written = self.merge_level(key, level, rule, groups).await?;
            summary.buckets.push((level, written));
        }

        debug!(series = %key, raw = summary.raw_points, "recorded batch");
        Ok(summary)
    }

    fn group_by_key<'a>(
        &self,
        points: &'a [DataPoint],
        tz: &Tz,
        level: BucketSize,
    ) -> Result<BTreeMap<i64, Vec<&'a AggregateValue>>> {
        let mut groups: BTreeMap<i64, Vec<&AggregateValue>> = BTreeMap::new();
        for point in points {
            let storage_key = self.shift.to_storage_key(point.timestamp, tz, level)?;
            groups.entry(storage_key).or_default().push(&point.value);
        }
        Ok(groups)
    }

    fn lock_for(&self, key: &LockKey) -> Arc<Mutex<()>> {
        self.locks.entry(key.clone()).or_default().clone()
    }

    fn release(&self, key: &LockKey) {
        // the map's own handle is the only one left once nobody waits
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn merge_level(
        &self,
        key: &SeriesKey,
        level: BucketSize,
        rule: AggregationRule,
        groups: BTreeMap<i64, Vec<&AggregateValue>>,
    ) -> Result<usize> {
        let (first, last) = match (groups.keys().next(), groups.keys().next_back()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return Ok(0),
        };

        let lock_key = (key.clone(), level);
        let lock = self.lock_for(&lock_key);
        let result = {
            let _guard = lock.lock().await;
            self.merge_locked(key, level, rule, &groups, TimeRange::new(first, last)?)
                .await
        };
        drop(lock);
        self.release(&lock_key);
        result
    }

    async fn merge_locked(
        &self,
        key: &SeriesKey,
        level: BucketSize,
        rule: AggregationRule,
        groups: &BTreeMap<i64, Vec<&AggregateValue>>,
        range: TimeRange,
    ) -> Result<usize> {
        let series = rollup_series_name(&key.metric, level);
        let mut request = QueryRequest::new(series.as_str(), range).series_tags(&key.tags);
        if let Some(kind) = stored_kind(rule, groups) {
            request = request.value_kind(kind);
        }
        let existing: HashMap<i64, AggregateValue> = self
            .store
            .query(&request)
            .await?
            .into_iter()
            .filter(|p| groups.contains_key(&p.timestamp))
            .map(|p| (p.timestamp, p.value))
            .collect();

        let mut merged = Vec::with_capacity(groups.len());
        for (&storage_key, contributions) in groups {
            let value = fold(existing.get(&storage_key), contributions.iter().copied(), rule);
            metrics::record_merge(rule, value.is_ok());
            merged.push(DataPoint {
                timestamp: storage_key,
                value: value?,
            });
        }

        if let Err(e) = self.store.write(&series, &key.tags, &merged).await {
            warn!(series = %series, buckets = merged.len(), error = %e, "rollup write failed");
            return Err(e);
        }
        metrics::record_buckets_written(level, merged.len());
        debug!(series = %series, buckets = merged.len(), "rollup level merged");
        Ok(merged.len())
    }
}

/// Variant the rollup series of a batch holds
fn stored_kind(
    rule: AggregationRule,
    groups: &BTreeMap<i64, Vec<&AggregateValue>>,
) -> Option<ValueKind> {
    match rule {
        AggregationRule::Average => Some(ValueKind::Average),
        AggregationRule::Sum => groups
            .values()
            .flat_map(|contributions| contributions.first())
            .next()
            .map(|value| value.kind()),
    }
}
