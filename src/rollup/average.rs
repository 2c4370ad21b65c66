//! Running average codec
//!
//! An AVERAGE metric stores, per bucket, the pair `(sum, weight)` so the mean
//! can be updated one sample at a time without re-reading history. The pair
//! only ever exists on the wire as a small JSON record:
//!
//! ```text
//! {"sum":10.333,"weight":3}
//! ```
//!
//! `sum` always carries exactly three fractional digits, rounded half-up
//! (away from zero), and `weight` is a positive integer.
//!
//! # Example
//!
//! ```rust
//! use activity_rollups::rollup::average::{add_sample, average, decode, encode};
//!
//! let stored = encode(1.0, 2).unwrap();
//! let updated = add_sample(&stored, 9.3333).unwrap();
//!
//! let pair = decode(&updated).unwrap();
//! assert_eq!(pair.sum, 10.333);
//! assert_eq!(pair.weight, 3);
//! assert_eq!(average(&updated).unwrap(), 3.444);
//! ```

use serde_json::Value;

use crate::error::{Error, Result};

/// Slack applied before the half-way comparison so that values such as
/// `1.0005`, which land just below `.5` after scaling, still round up.
const ROUNDING_TOLERANCE: f64 = 1e-9;

const SUM_FIELD: &str = "sum";
const WEIGHT_FIELD: &str = "weight";

/// Decoded `(sum, weight)` pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningAverage {
    /// Sum of all samples, rounded to three fractional digits
    pub sum: f64,
    /// Number of samples, at least 1
    pub weight: u32,
}

/// Round to three fractional digits, half-up away from zero
pub fn round3(value: f64) -> f64 {
    let scaled = value.abs() * 1000.0;
    let floor = scaled.floor();
    let rounded = if scaled - floor + ROUNDING_TOLERANCE >= 0.5 {
        floor + 1.0
    } else {
        floor
    };
    let result = (rounded / 1000.0).copysign(value);
    // normalise -0.0 so it never prints as "-0.000"
    if result == 0.0 {
        0.0
    } else {
        result
    }
}

/// Serialize a running average
///
/// Fails with `InvalidArgument` when `weight` is zero or `sum` is not finite.
pub fn encode(sum: f64, weight: u32) -> Result<String> {
    if weight == 0 {
        return Err(Error::invalid("running average weight must be at least 1"));
    }
    if !sum.is_finite() {
        return Err(Error::invalid(format!(
            "running average sum must be finite, got {}",
            sum
        )));
    }
    Ok(format!(
        "{{\"{}\":{:.3},\"{}\":{}}}",
        SUM_FIELD,
        round3(sum),
        WEIGHT_FIELD,
        weight
    ))
}

/// Parse a serialized running average
///
/// Missing fields or a non-positive weight fail with `InvalidArgument`;
/// malformed text or non-numeric fields fail with `Parse`.
pub fn decode(encoded: &str) -> Result<RunningAverage> {
    let record: Value = serde_json::from_str(encoded)
        .map_err(|e| Error::Parse(format!("malformed running average '{}': {}", encoded, e)))?;
    let fields = record.as_object().ok_or_else(|| {
        Error::Parse(format!("running average '{}' is not a record", encoded))
    })?;

    let sum = match fields.get(SUM_FIELD) {
        None | Some(Value::Null) => {
            return Err(Error::invalid(format!(
                "running average '{}' has no sum",
                encoded
            )))
        }
        Some(v) => parse_sum(v)?,
    };
    let weight = match fields.get(WEIGHT_FIELD) {
        None | Some(Value::Null) => {
            return Err(Error::invalid(format!(
                "running average '{}' has no weight",
                encoded
            )))
        }
        Some(v) => parse_weight(v)?,
    };

    Ok(RunningAverage { sum, weight })
}

fn parse_sum(value: &Value) -> Result<f64> {
    let sum = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match sum {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(Error::Parse(format!(
            "running average sum {} is not a number",
            value
        ))),
    }
}

fn parse_weight(value: &Value) -> Result<u32> {
    let weight: i64 = match value {
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(v), _) => v,
            (None, Some(_)) => i64::MAX,
            (None, None) => {
                return Err(Error::Parse(format!(
                    "running average weight {} is not an integer",
                    n
                )))
            }
        },
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| {
            Error::Parse(format!("running average weight '{}' is not an integer", s))
        })?,
        other => {
            return Err(Error::Parse(format!(
                "running average weight {} is not an integer",
                other
            )))
        }
    };
    if weight <= 0 {
        return Err(Error::invalid(format!(
            "running average weight must be positive, got {}",
            weight
        )));
    }
    u32::try_from(weight)
        .map_err(|_| Error::invalid(format!("running average weight {} is too large", weight)))
}

/// Fold one more sample into a serialized running average
pub fn add_sample(existing: &str, value: f64) -> Result<String> {
    let current = decode(existing)?;
    let weight = current
        .weight
        .checked_add(1)
        .ok_or_else(|| Error::invalid("running average weight overflow"))?;
    encode(current.sum + value, weight)
}

/// Mean of a serialized running average, rounded to three fractional digits
pub fn average(encoded: &str) -> Result<f64> {
    let pair = decode(encoded)?;
    Ok(round3(pair.sum / f64::from(pair.weight)))
}
