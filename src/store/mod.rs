//! The external time-series store seam
//!
//! The rollup engine only needs two things from a store: a range query with
//! an optional sum down-sampling window, and a batch write. Everything else
//! about the store (retention, indexing, its own query engine) stays on the
//! other side of [`TimeSeriesStore`].
//!
//! Two implementations ship with the crate:
//!
//! - [`InMemoryStore`]: KairosDB-compatible semantics in process memory, for
//!   tests and embedding
//! - [`KairosStore`]: REST client for a KairosDB server
//!
//! [`from_config`] picks one from the `[store]` configuration section.

pub mod kairos;
pub mod memory;
pub mod retry;

pub use kairos::{KairosConfig, KairosStore};
pub use memory::InMemoryStore;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{Error, Result};
use crate::types::{DataPoint, TagSet, TimeRange, TimeUnit, ValueKind};

/// Tag constraints of a query: every listed key must match one of its values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagFilters(BTreeMap<String, Vec<String>>);

impl TagFilters {
    /// No constraints
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to equal `value` (additional values for a key are ORed)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Exact-match filters for every tag of a series
    pub fn exact(tags: &TagSet) -> Self {
        tags.iter()
            .fold(Self::new(), |filters, (k, v)| filters.with(k.as_str(), v.as_str()))
    }

    /// Check whether a series' tags satisfy the filters
    pub fn matches(&self, tags: &TagSet) -> bool {
        self.0.iter().all(|(key, values)| {
            tags.get(key)
                .map(|actual| values.iter().any(|v| v == actual))
                .unwrap_or(false)
        })
    }

    /// Check whether `tags` is exactly the one tag set these filters describe
    ///
    /// Every filter key must carry a single value, and the series may not
    /// have tags beyond the filtered ones.
    pub fn matches_exactly(&self, tags: &TagSet) -> bool {
        tags.len() == self.0.len()
            && self.0.iter().all(|(key, values)| match values.as_slice() {
                [value] => tags.get(key) == Some(value),
                _ => false,
            })
    }

    /// Iterate over `(key, accepted values)`
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// True if no constraint is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Sum down-sampling window applied by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumWindow {
    /// Number of units per window
    pub value: u32,
    /// Window unit
    pub unit: TimeUnit,
}

impl SumWindow {
    /// Create a window, rejecting zero-width ones
    pub fn new(value: u32, unit: TimeUnit) -> Result<Self> {
        if value == 0 {
            return Err(Error::invalid("sum window must span at least one unit"));
        }
        Ok(Self { value, unit })
    }
}

/// A range query against one series name
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Series name
    pub series_name: String,
    /// Tag constraints
    pub tag_filters: TagFilters,
    /// Inclusive time range
    pub range: TimeRange,
    /// Sum window, or `None` for raw points
    pub sum_window: Option<SumWindow>,
    /// Only series whose tags equal the filters, no supersets
    pub exact_tags: bool,
    /// Variant the series holds, for stores that cannot tell on the wire
    pub value_kind: Option<ValueKind>,
}

impl QueryRequest {
    /// Raw query for `series_name` over `range`
    pub fn new(series_name: impl Into<String>, range: TimeRange) -> Self {
        Self {
            series_name: series_name.into(),
            tag_filters: TagFilters::new(),
            range,
            sum_window: None,
            exact_tags: false,
            value_kind: None,
        }
    }

    /// Restrict to series whose tags include the filters
    pub fn tag_filters(mut self, filters: TagFilters) -> Self {
        self.tag_filters = filters;
        self.exact_tags = false;
        self
    }

    /// Restrict to the single series tagged exactly `tags`
    pub fn series_tags(mut self, tags: &TagSet) -> Self {
        self.tag_filters = TagFilters::exact(tags);
        self.exact_tags = true;
        self
    }

    /// Declare the variant stored values decode to
    pub fn value_kind(mut self, kind: ValueKind) -> Self {
        self.value_kind = Some(kind);
        self
    }

    /// Check whether a series with `tags` belongs to the result
    pub fn accepts(&self, tags: &TagSet) -> bool {
        if self.exact_tags {
            self.tag_filters.matches_exactly(tags)
        } else {
            self.tag_filters.matches(tags)
        }
    }

    /// Sum points per window
    pub fn sum_window(mut self, window: SumWindow) -> Self {
        self.sum_window = Some(window);
        self
    }
}

/// Narrow interface to the external time-series store
#[async_trait]
pub trait TimeSeriesStore: Send + Sync + 'static {
    /// Identifier for logs and metrics
    fn store_id(&self) -> &str;

    /// Points of the matching series in the requested range
    ///
    /// Timestamps of summed windows are not guaranteed to be window-aligned.
    async fn query(&self, request: &QueryRequest) -> Result<Vec<DataPoint>>;

    /// Write points to one series; any failure fails the whole batch
    async fn write(&self, series_name: &str, tags: &TagSet, points: &[DataPoint]) -> Result<()>;
}

/// Build the store selected by `config.backend`
pub fn from_config(config: &StoreConfig) -> Result<Arc<dyn TimeSeriesStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        StoreBackend::Kairosdb => Ok(Arc::new(KairosStore::new(config.kairos_config())?)),
    }
}
