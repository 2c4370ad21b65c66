//! KairosDB REST adapter
//!
//! Writes go to `POST /api/v1/datapoints`, queries to
//! `POST /api/v1/datapoints/query` with a `sum` aggregator when a window is
//! requested. Timeouts, connection errors and 5xx responses are retried with
//! the configured [`RetryPolicy`]; 4xx responses fail immediately.
//!
//! KairosDB tag filters match every series that carries the filtered tags,
//! including series with additional tags. A query for one exact series
//! first asks `POST /api/v1/datapoints/query/tags` which tag keys occur
//! under the filters. If any key lies outside the filters, the data query
//! groups by all of them and only the group tagged exactly like the series
//! is kept.
//!
//! Request bodies are built and responses parsed by plain functions so the
//! wire format can be tested without a server.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

use super::{QueryRequest, RetryPolicy, TimeSeriesStore};
use crate::error::{Error, Result};
use crate::metrics;
use crate::types::{AggregateValue, DataPoint, TagSet, ValueKind};

const WRITE_PATH: &str = "/api/v1/datapoints";
const QUERY_PATH: &str = "/api/v1/datapoints/query";
const TAGS_PATH: &str = "/api/v1/datapoints/query/tags";

/// Connection settings for [`KairosStore`]
#[derive(Debug, Clone)]
pub struct KairosConfig {
    /// Base URL, e.g. `http://localhost:8080`
    pub base_url: String,
    /// Timeout of a single HTTP request
    pub request_timeout: Duration,
    /// Retry policy for transient failures
    pub retry_policy: RetryPolicy,
}

impl Default for KairosConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            request_timeout: Duration::from_secs(10),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl KairosConfig {
    /// Create a new config with the specified URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            base_url: url.into(),
            ..Default::default()
        }
    }

    /// Set the request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// One failed HTTP attempt, classified for the retry loop
#[derive(Debug)]
enum Attempt {
    Transient(Error),
    Permanent(Error),
}

impl Attempt {
    fn is_transient(&self) -> bool {
        matches!(self, Attempt::Transient(_))
    }

    fn into_error(self) -> Error {
        match self {
            Attempt::Transient(e) | Attempt::Permanent(e) => e,
        }
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attempt::Transient(e) | Attempt::Permanent(e) => e.fmt(f),
        }
    }
}

/// [`TimeSeriesStore`] backed by a KairosDB server
pub struct KairosStore {
    config: KairosConfig,
    client: Client,
}

impl KairosStore {
    /// Create a client for the configured server
    pub fn new(config: KairosConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(Error::Configuration("KairosDB URL cannot be empty".into()));
        }
        let client = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_once(
        &self,
        url: &str,
        body: &Value,
    ) -> std::result::Result<Option<Value>, Attempt> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let transient = e.is_timeout() || e.is_connect() || e.is_request();
                let err = Error::from(e);
                if transient {
                    Attempt::Transient(err)
                } else {
                    Attempt::Permanent(err)
                }
            })?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if status.is_success() {
            let text = response.text().await.map_err(|e| Attempt::Transient(e.into()))?;
            if text.trim().is_empty() {
                return Ok(None);
            }
            return serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| Attempt::Permanent(Error::Parse(format!("KairosDB response: {}", e))));
        }

        let detail = response.text().await.unwrap_or_default();
        let err = Error::Upstream(format!("KairosDB returned {}: {}", status, detail.trim()));
        if status.is_server_error() {
            Err(Attempt::Transient(err))
        } else {
            Err(Attempt::Permanent(err))
        }
    }

    async fn post(
        &self,
        operation: &'static str,
        path: &str,
        body: &Value,
    ) -> Result<Option<Value>> {
        let url = self.url(path);
        let url = url.as_str();
        let start = Instant::now();
        let result = self
            .config
            .retry_policy
            .execute(operation, move || self.post_once(url, body), Attempt::is_transient)
            .await
            .map_err(Attempt::into_error);
        metrics::record_store_request(operation, result.is_ok(), start.elapsed());
        result
    }

    /// Tag keys to group an exact-series query by, empty if none are needed
    async fn group_keys(&self, request: &QueryRequest) -> Result<Vec<String>> {
        let response = self
            .post("tags", TAGS_PATH, &build_tag_query_body(request))
            .await?
            .ok_or_else(|| Error::Parse("KairosDB returned an empty tags response".into()))?;
        let keys = parse_tag_keys(&response)?;
        let nested = keys
            .iter()
            .any(|key| !request.tag_filters.iter().any(|(filtered, _)| filtered == key));
        Ok(if nested { keys.into_iter().collect() } else { Vec::new() })
    }
}

impl fmt::Debug for KairosStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KairosStore")
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

fn value_to_json(value: &AggregateValue) -> Result<Value> {
    match value {
        AggregateValue::Integer(v) => Ok(json!(v)),
        AggregateValue::Float(v) if v.is_finite() => Ok(json!(v)),
        AggregateValue::Float(v) => {
            Err(Error::invalid(format!("cannot store non-finite value {}", v)))
        }
        AggregateValue::Average(s) => Ok(Value::String(s.clone())),
    }
}

/// Body of a `/api/v1/datapoints` write
///
/// KairosDB requires at least one tag and one value type per metric entry.
pub fn build_write_body(series_name: &str, tags: &TagSet, points: &[DataPoint]) -> Result<Value> {
    if series_name.trim().is_empty() {
        return Err(Error::invalid("series name cannot be empty"));
    }
    if tags.is_empty() {
        return Err(Error::invalid(format!(
            "series '{}' needs at least one tag to be stored in KairosDB",
            series_name
        )));
    }
    let strings = points
        .iter()
        .filter(|p| matches!(p.value, AggregateValue::Average(_)))
        .count();
    if strings != 0 && strings != points.len() {
        return Err(Error::invalid(format!(
            "series '{}' mixes string and numeric values in one batch",
            series_name
        )));
    }

    let datapoints = points
        .iter()
        .map(|p| Ok(json!([p.timestamp, value_to_json(&p.value)?])))
        .collect::<Result<Vec<_>>>()?;
    let tag_map: Map<String, Value> = tags
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    let mut entry = json!({
        "name": series_name,
        "tags": tag_map,
        "datapoints": datapoints,
    });
    if strings != 0 {
        entry["type"] = json!("string");
    }
    Ok(json!([entry]))
}

fn filter_json(request: &QueryRequest) -> Map<String, Value> {
    request
        .tag_filters
        .iter()
        .map(|(k, values)| (k.clone(), json!(values)))
        .collect()
}

/// Body of a `/api/v1/datapoints/query/tags` request
pub fn build_tag_query_body(request: &QueryRequest) -> Value {
    json!({
        "start_absolute": request.range.start,
        "end_absolute": request.range.end,
        "metrics": [{ "name": request.series_name, "tags": filter_json(request) }],
    })
}

/// Tag keys present in a `/api/v1/datapoints/query/tags` response
pub fn parse_tag_keys(body: &Value) -> Result<BTreeSet<String>> {
    let mut keys = BTreeSet::new();
    for result in results(body)? {
        if let Some(tags) = result.get("tags").and_then(Value::as_object) {
            keys.extend(tags.keys().cloned());
        }
    }
    Ok(keys)
}

/// Body of a `/api/v1/datapoints/query` request
///
/// A non-empty `group_by` splits the result into one group per combination
/// of values of those tag keys.
pub fn build_query_body(request: &QueryRequest, group_by: &[String]) -> Value {
    let mut metric = json!({
        "name": request.series_name,
        "tags": filter_json(request),
    });
    if !group_by.is_empty() {
        metric["group_by"] = json!([{ "name": "tag", "tags": group_by }]);
    }
    if let Some(window) = request.sum_window {
        metric["aggregators"] = json!([{
            "name": "sum",
            "sampling": { "value": window.value, "unit": window.unit.as_str() },
        }]);
    }

    json!({
        "start_absolute": request.range.start,
        "end_absolute": request.range.end,
        "metrics": [metric],
    })
}

/// Decode one value; whole numbers become floats when the series holds floats
fn parse_value(raw: &Value, kind: Option<ValueKind>) -> Result<AggregateValue> {
    match raw {
        Value::Number(n) => match (kind, n.as_i64()) {
            (Some(ValueKind::Float), _) | (_, None) => n
                .as_f64()
                .map(AggregateValue::Float)
                .ok_or_else(|| Error::Parse(format!("unrepresentable number {}", n))),
            (_, Some(i)) => Ok(AggregateValue::Integer(i)),
        },
        Value::String(s) => Ok(AggregateValue::Average(s.clone())),
        other => Err(Error::Parse(format!("unexpected data point value {}", other))),
    }
}

fn results(body: &Value) -> Result<Vec<&Value>> {
    let queries = body
        .get("queries")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Parse("KairosDB response has no queries".into()))?;

    let mut out = Vec::new();
    for query in queries {
        let results = query
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Parse("KairosDB query has no results".into()))?;
        out.extend(results);
    }
    Ok(out)
}

/// Tags of one result group, `None` if any key carries several values
fn result_tags(result: &Value) -> Option<TagSet> {
    let tags = result.get("tags")?.as_object()?;
    let mut set = TagSet::new();
    for (key, values) in tags {
        match values.as_array().map(Vec::as_slice) {
            Some([Value::String(value)]) => set.insert(key.as_str(), value.as_str()),
            _ => return None,
        }
    }
    Some(set)
}

/// Data points of a query response for `request`, ascending by timestamp
///
/// Exact-series requests keep only the result group tagged like the series.
pub fn parse_query_response(body: &Value, request: &QueryRequest) -> Result<Vec<DataPoint>> {
    let mut points = Vec::new();
    for result in results(body)? {
        if request.exact_tags && !result_tags(result).is_some_and(|tags| request.accepts(&tags)) {
            continue;
        }
        let values = match result.get("values") {
            Some(Value::Array(values)) => values,
            None | Some(Value::Null) => continue,
            Some(other) => return Err(Error::Parse(format!("values is not an array: {}", other))),
        };
        for pair in values {
            let (ts, raw) = match pair.as_array().map(Vec::as_slice) {
                Some([ts, raw]) => (ts, raw),
                _ => return Err(Error::Parse(format!("malformed data point {}", pair))),
            };
            let timestamp = ts
                .as_i64()
                .ok_or_else(|| Error::Parse(format!("malformed timestamp {}", ts)))?;
            points.push(DataPoint {
                timestamp,
                value: parse_value(raw, request.value_kind)?,
            });
        }
    }
    points.sort_by_key(|p| p.timestamp);
    Ok(points)
}

#[async_trait]
impl TimeSeriesStore for KairosStore {
    fn store_id(&self) -> &str {
        "kairosdb"
    }

    #[instrument(skip(self), fields(series = %request.series_name))]
    async fn query(&self, request: &QueryRequest) -> Result<Vec<DataPoint>> {
        let group_by = if request.exact_tags {
            self.group_keys(request).await?
        } else {
            Vec::new()
        };
        let body = build_query_body(request, &group_by);
        let response = self
            .post("query", QUERY_PATH, &body)
            .await?
            .ok_or_else(|| Error::Parse("KairosDB returned an empty query response".into()))?;
        let points = parse_query_response(&response, request)?;
        debug!(points = points.len(), "KairosDB query complete");
        Ok(points)
    }

    #[instrument(skip(self, tags, points), fields(points = points.len()))]
    async fn write(&self, series_name: &str, tags: &TagSet, points: &[DataPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = build_write_body(series_name, tags, points)?;
        self.post("write", WRITE_PATH, &body).await?;
        Ok(())
    }
}
