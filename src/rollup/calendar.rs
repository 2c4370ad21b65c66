//! Timezone-aware calendar arithmetic on epoch milliseconds
//!
//! All functions are pure. Wall-clock values are `NaiveDateTime`s interpreted
//! in an explicit timezone; instants are UTC epoch milliseconds.

use chrono::{LocalResult, Months, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{Error, Result};
use crate::types::{TimeUnit, MS_PER_HOUR};

/// Half-width of the search window used to locate a forward DST transition.
/// Wider than any real UTC offset plus a full day.
const TRANSITION_SEARCH_MS: i64 = 27 * MS_PER_HOUR;

/// Parse an IANA timezone name such as `Europe/Berlin`
pub fn parse_timezone(name: &str) -> Result<Tz> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid("timezone must not be empty"));
    }
    trimmed
        .parse::<Tz>()
        .map_err(|_| Error::invalid(format!("unknown timezone '{}'", trimmed)))
}

/// Wall-clock time of `timestamp` in `tz`
pub fn local_naive(timestamp: i64, tz: &Tz) -> Result<NaiveDateTime> {
    let utc = Utc
        .timestamp_millis_opt(timestamp)
        .single()
        .ok_or_else(|| Error::invalid(format!("timestamp {} is out of range", timestamp)))?;
    Ok(utc.with_timezone(tz).naive_local())
}

/// Wall-clock time read as if it were UTC, in epoch milliseconds
pub fn naive_as_utc_millis(naive: &NaiveDateTime) -> i64 {
    Utc.from_utc_datetime(naive).timestamp_millis()
}

/// Earliest instant whose wall clock in `tz` is at or after `naive`
///
/// For a wall-clock time that exists once this is its instant; for one that
/// occurs twice (backward transition) the earlier instant. For one skipped by
/// a forward transition it is the transition instant itself.
pub fn first_instant_at_or_after(tz: &Tz, naive: &NaiveDateTime) -> Result<i64> {
    match tz.from_local_datetime(naive) {
        LocalResult::Single(dt) => Ok(dt.timestamp_millis()),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.timestamp_millis()),
        LocalResult::None => {
            // wall(lo) < naive <= wall(hi); the wall clock is monotonic across
            // a forward transition, so bisect on the instant.
            let guess = naive_as_utc_millis(naive);
            let mut lo = guess - TRANSITION_SEARCH_MS;
            let mut hi = guess + TRANSITION_SEARCH_MS;
            while hi - lo > 1 {
                let mid = lo + (hi - lo) / 2;
                if local_naive(mid, tz)? >= *naive {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            Ok(hi)
        }
    }
}

/// UTC offset of `tz` at `timestamp`, in milliseconds
pub fn utc_offset_ms(timestamp: i64, tz: &Tz) -> Result<i64> {
    Ok(naive_as_utc_millis(&local_naive(timestamp, tz)?) - timestamp)
}

/// First instant in `(lo, hi]` already carrying the offset in force at `hi`
///
/// Assumes a single offset change between `lo` and `hi`.
pub fn offset_transition(tz: &Tz, lo: i64, hi: i64) -> Result<i64> {
    let target = utc_offset_ms(hi, tz)?;
    let (mut lo, mut hi) = (lo, hi);
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if utc_offset_ms(mid, tz)? == target {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    Ok(hi)
}

/// Add `n` calendar units to a wall-clock time
///
/// Months and years use calendar arithmetic and clamp the day of month;
/// callers step from a first-of-period anchor so clamping never occurs.
pub fn add_units(naive: &NaiveDateTime, unit: TimeUnit, n: u32) -> Result<NaiveDateTime> {
    let stepped = match unit {
        TimeUnit::Months => naive.checked_add_months(Months::new(n)),
        TimeUnit::Years => n
            .checked_mul(12)
            .and_then(|months| naive.checked_add_months(Months::new(months))),
        fixed => fixed
            .fixed_millis()
            .and_then(|ms| ms.checked_mul(i64::from(n)))
            .and_then(|ms| naive.checked_add_signed(chrono::Duration::milliseconds(ms))),
    };
    stepped.ok_or_else(|| {
        Error::invalid(format!(
            "adding {} {} to {} overflows the calendar",
            n, unit, naive
        ))
    })
}

/// The `n`-th boundary after `anchor`, stepping `unit` in UTC
///
/// Computed directly from the anchor rather than by repeated stepping, so a
/// month walk that starts on the 31st does not drift after February.
pub fn nth_utc_boundary(anchor: i64, unit: TimeUnit, n: u32) -> Result<i64> {
    if let Some(ms) = unit.fixed_millis() {
        return ms
            .checked_mul(i64::from(n))
            .and_then(|offset| anchor.checked_add(offset))
            .ok_or_else(|| Error::invalid("bucket walk overflows the timestamp range"));
    }
    let naive = local_naive(anchor, &Tz::UTC)?;
    Ok(naive_as_utc_millis(&add_units(&naive, unit, n)?))
}
