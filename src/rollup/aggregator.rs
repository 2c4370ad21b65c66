//! Incremental aggregation of bucket values
//!
//! Merges a new contribution into the value already stored for a bucket.
//! The rule is fixed per metric:
//!
//! - **`Sum`**: integers add to integers, floats to floats. Mixing the two,
//!   or involving a running average, is a `TypeMismatch`.
//! - **`Average`**: contributions are float samples folded into a serialized
//!   running average (see [`super::average`]).
//!
//! Nothing here touches the store; the caller owns persistence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::average;
use crate::error::{Error, Result};
use crate::types::AggregateValue;

/// How contributions to the same bucket combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AggregationRule {
    /// Running total
    Sum,
    /// Running mean stored as `(sum, weight)`
    Average,
}

impl AggregationRule {
    /// Lower-case rule name
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationRule::Sum => "sum",
            AggregationRule::Average => "average",
        }
    }
}

impl fmt::Display for AggregationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(AggregationRule::Sum),
            "average" | "avg" => Ok(AggregationRule::Average),
            other => Err(Error::UnsupportedAggregation(other.to_string())),
        }
    }
}

impl TryFrom<String> for AggregationRule {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AggregationRule> for String {
    fn from(rule: AggregationRule) -> Self {
        rule.as_str().to_string()
    }
}

/// The aggregate for a bucket that has no stored value yet
pub fn initial_value(
    contribution: &AggregateValue,
    rule: AggregationRule,
) -> Result<AggregateValue> {
    match (rule, contribution) {
        (AggregationRule::Sum, AggregateValue::Integer(_) | AggregateValue::Float(_)) => {
            Ok(contribution.clone())
        }
        (AggregationRule::Sum, other) => {
            Err(Error::mismatch("integer or float", other.kind_name()))
        }
        (AggregationRule::Average, AggregateValue::Float(v)) => {
            Ok(AggregateValue::Average(average::encode(*v, 1)?))
        }
        (AggregationRule::Average, other) => Err(Error::mismatch("float", other.kind_name())),
    }
}

/// Merge `contribution` into `existing` under `rule`
pub fn merge(
    existing: &AggregateValue,
    contribution: &AggregateValue,
    rule: AggregationRule,
) -> Result<AggregateValue> {
    match rule {
        AggregationRule::Sum => match (existing, contribution) {
            (AggregateValue::Integer(a), AggregateValue::Integer(b)) => a
                .checked_add(*b)
                .map(AggregateValue::Integer)
                .ok_or_else(|| Error::invalid(format!("integer sum {} + {} overflows", a, b))),
            (AggregateValue::Float(a), AggregateValue::Float(b)) => {
                Ok(AggregateValue::Float(a + b))
            }
            (AggregateValue::Integer(_), other) | (other, AggregateValue::Integer(_)) => {
                Err(Error::mismatch("integer", other.kind_name()))
            }
            (AggregateValue::Float(_), other) | (other, AggregateValue::Float(_)) => {
                Err(Error::mismatch("float", other.kind_name()))
            }
            (AggregateValue::Average(_), AggregateValue::Average(_)) => {
                Err(Error::mismatch("integer or float", "running average"))
            }
        },
        AggregationRule::Average => match (existing, contribution) {
            (AggregateValue::Average(encoded), AggregateValue::Float(v)) => {
                Ok(AggregateValue::Average(average::add_sample(encoded, *v)?))
            }
            (AggregateValue::Average(_), other) => Err(Error::mismatch("float", other.kind_name())),
            (other, _) => Err(Error::mismatch("running average", other.kind_name())),
        },
    }
}

/// Merge into `existing` when present, otherwise start a new aggregate
pub fn merge_or_init(
    existing: Option<&AggregateValue>,
    contribution: &AggregateValue,
    rule: AggregationRule,
) -> Result<AggregateValue> {
    match existing {
        Some(current) => merge(current, contribution, rule),
        None => initial_value(contribution, rule),
    }
}

/// Fold several contributions to one bucket, in order
///
/// Fails with `InvalidArgument` when there is neither an existing value nor
/// any contribution.
pub fn fold<'a, I>(
    existing: Option<&AggregateValue>,
    contributions: I,
    rule: AggregationRule,
) -> Result<AggregateValue>
where
    I: IntoIterator<Item = &'a AggregateValue>,
{
    let mut acc = existing.cloned();
    for contribution in contributions {
        acc = Some(merge_or_init(acc.as_ref(), contribution, rule)?);
    }
    acc.ok_or_else(|| Error::invalid("nothing to aggregate: no existing value, no contributions"))
}
