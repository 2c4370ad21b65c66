//! End-to-end write and read of rollups against the in-memory store

use activity_rollups::ingestion::{rollup_series_name, RollupWriter};
use activity_rollups::query::RollupReader;
use activity_rollups::rollup::average;
use activity_rollups::rollup::bucket::bucket_start;
use activity_rollups::rollup::calendar::naive_as_utc_millis;
use activity_rollups::store::InMemoryStore;
use activity_rollups::{AggregateValue, BucketSize, DataPoint, Error, SeriesKey, UtcShift};
use activity_rollups::config::{Config, MetricDefinition};
use activity_rollups::rollup::AggregationRule;
use chrono::NaiveDate;
use chrono_tz::Tz;
use std::sync::Arc;

const HOUR: i64 = 3_600_000;

fn utc_ms(y: i32, m: u32, d: u32, h: u32, min: u32) -> i64 {
    naive_as_utc_millis(
        &NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap(),
    )
}

fn setup(levels: Vec<BucketSize>) -> (Arc<InMemoryStore>, RollupWriter, RollupReader) {
    let store = Arc::new(InMemoryStore::new());
    let mut config = Config::default();
    config.rollup.levels = levels;
    config.metrics = vec![
        MetricDefinition::new("steps", AggregationRule::Sum),
        MetricDefinition::new("rest", AggregationRule::Average),
    ];
    let writer = RollupWriter::from_config(store.clone(), &config).unwrap();
    let reader = RollupReader::new(store.clone(), config.rollup.shift().unwrap());
    (store, writer, reader)
}

fn steps_key() -> SeriesKey {
    SeriesKey::new("steps").with_tag("device", "watch-7")
}

#[tokio::test]
async fn test_write_then_read_monthly_sum() {
    let (_store, writer, reader) = setup(vec![BucketSize::Months]);
    let key = steps_key();
    let tz = Tz::UTC;

    writer
        .record(
            &key,
            &tz,
            &[
                DataPoint::new(utc_ms(2024, 5, 29, 10, 0), 1i64),
                DataPoint::new(utc_ms(2024, 5, 30, 11, 0), 2i64),
                DataPoint::new(utc_ms(2024, 7, 2, 8, 0), 2i64),
            ],
        )
        .await
        .unwrap();

    let buckets = reader
        .read_rollup(
            &key,
            &tz,
            BucketSize::Months,
            utc_ms(2024, 5, 1, 0, 0),
            Some(utc_ms(2024, 8, 1, 0, 0)),
            false,
        )
        .await
        .unwrap();

    let values: Vec<(i64, AggregateValue)> =
        buckets.iter().map(|b| (b.start, b.value.clone())).collect();
    assert_eq!(
        values,
        vec![
            (utc_ms(2024, 5, 1, 0, 0), AggregateValue::Integer(3)),
            (utc_ms(2024, 6, 1, 0, 0), AggregateValue::Integer(0)),
            (utc_ms(2024, 7, 1, 0, 0), AggregateValue::Integer(2)),
        ]
    );
    assert_eq!(buckets[0].end, utc_ms(2024, 6, 1, 0, 0) - 1);

    let sparse = reader
        .read_rollup(
            &key,
            &tz,
            BucketSize::Months,
            utc_ms(2024, 5, 1, 0, 0),
            Some(utc_ms(2024, 8, 1, 0, 0)),
            true,
        )
        .await
        .unwrap();
    assert_eq!(sparse.len(), 2);
}

#[tokio::test]
async fn test_raw_and_rollup_agree() {
    let (_store, writer, reader) = setup(vec![BucketSize::Months]);
    let key = steps_key();
    let points = [
        DataPoint::new(utc_ms(2024, 5, 29, 10, 0), 3i64),
        DataPoint::new(utc_ms(2024, 7, 2, 8, 0), 2i64),
    ];
    writer.record(&key, &Tz::UTC, &points).await.unwrap();

    let summed = reader
        .read_raw_summed(
            &key,
            BucketSize::Months,
            utc_ms(2024, 5, 1, 0, 0),
            Some(utc_ms(2024, 8, 1, 0, 0)),
            false,
        )
        .await
        .unwrap();
    let rolled = reader
        .read_rollup(
            &key,
            &Tz::UTC,
            BucketSize::Months,
            utc_ms(2024, 5, 1, 0, 0),
            Some(utc_ms(2024, 8, 1, 0, 0)),
            false,
        )
        .await
        .unwrap();

    let from_raw: Vec<_> = summed.buckets.iter().map(|b| (b.start, b.value.clone())).collect();
    let from_rollup: Vec<_> = rolled.iter().map(|b| (b.start, b.value.clone())).collect();
    assert_eq!(from_raw, from_rollup);
}

#[tokio::test]
async fn test_local_days_in_half_hour_zone() {
    let (store, writer, reader) = setup(vec![BucketSize::Days]);
    let key = steps_key();
    let tz = Tz::Asia__Kolkata;

    // 23:50 and 00:10 local are on different days
    let late = utc_ms(2024, 5, 29, 18, 20);
    let early = utc_ms(2024, 5, 29, 18, 40);
    writer
        .record(&key, &tz, &[DataPoint::new(late, 10i64), DataPoint::new(early, 7i64)])
        .await
        .unwrap();
    assert_eq!(store.points(&rollup_series_name("steps", BucketSize::Days), &key.tags).len(), 2);

    let buckets = reader
        .read_rollup(&key, &tz, BucketSize::Days, late - 24 * HOUR, Some(early + HOUR), true)
        .await
        .unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].start, utc_ms(2024, 5, 28, 18, 30));
    assert_eq!(buckets[0].value, AggregateValue::Integer(10));
    assert_eq!(buckets[1].start, utc_ms(2024, 5, 29, 18, 30));
    assert_eq!(buckets[1].value, AggregateValue::Integer(7));
}

#[tokio::test]
async fn test_keys_survive_timezone_change() {
    let (store, writer, _reader) = setup(vec![BucketSize::Days]);
    let key = steps_key();

    // the same local calendar day recorded from two zones lands on one key
    writer
        .record(&key, &Tz::Asia__Kathmandu, &[DataPoint::new(utc_ms(2024, 5, 29, 4, 15), 5i64)])
        .await
        .unwrap();
    writer
        .record(&key, &Tz::America__New_York, &[DataPoint::new(utc_ms(2024, 5, 29, 14, 0), 6i64)])
        .await
        .unwrap();

    let rolled = store.points("steps_daily", &key.tags);
    assert_eq!(rolled.len(), 1);
    assert_eq!(rolled[0].value, AggregateValue::Integer(11));
}

#[tokio::test]
async fn test_running_average_over_batches() {
    let (store, writer, reader) = setup(vec![BucketSize::Weeks]);
    let key = SeriesKey::new("rest").with_tag("device", "watch-7");
    let tz = Tz::America__New_York;
    let monday_noon = utc_ms(2024, 5, 27, 16, 0);

    writer
        .record(&key, &tz, &[DataPoint::new(monday_noon, 1.0f64)])
        .await
        .unwrap();
    writer
        .record(
            &key,
            &tz,
            &[
                DataPoint::new(monday_noon + 24 * HOUR, 0.0f64),
                DataPoint::new(monday_noon + 48 * HOUR, 9.3333f64),
            ],
        )
        .await
        .unwrap();

    let rolled = store.points("rest_weekly", &key.tags);
    let AggregateValue::Average(encoded) = &rolled[0].value else {
        panic!("expected a running average, got {:?}", rolled[0].value);
    };
    let pair = average::decode(encoded).unwrap();
    assert_eq!((pair.sum, pair.weight), (10.333, 3));
    assert_eq!(average::average(encoded).unwrap(), 3.444);

    let buckets = reader
        .read_rollup(&key, &tz, BucketSize::Weeks, monday_noon, Some(monday_noon + HOUR), false)
        .await
        .unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].start, bucket_start(monday_noon, &tz, BucketSize::Weeks).unwrap());
    assert_eq!(buckets[0].value.as_f64().unwrap(), 3.444);
}

#[tokio::test]
async fn test_nested_tag_sets_do_not_share_rollups() {
    let (store, writer, reader) = setup(vec![BucketSize::Days]);
    let device = steps_key();
    let device_user = steps_key().with_tag("user", "u2");
    let t = utc_ms(2024, 5, 29, 10, 0);

    writer.record(&device_user, &Tz::UTC, &[DataPoint::new(t, 50i64)]).await.unwrap();
    writer.record(&device, &Tz::UTC, &[DataPoint::new(t + 1, 1i64)]).await.unwrap();

    assert_eq!(store.points("steps_daily", &device.tags)[0].value, AggregateValue::Integer(1));
    assert_eq!(
        store.points("steps_daily", &device_user.tags)[0].value,
        AggregateValue::Integer(50)
    );

    let day = utc_ms(2024, 5, 29, 0, 0);
    for (key, expected) in [(&device, 1i64), (&device_user, 50)] {
        let buckets = reader
            .read_rollup(key, &Tz::UTC, BucketSize::Days, day, Some(day + 24 * HOUR), false)
            .await
            .unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].value, AggregateValue::Integer(expected));
    }
}

#[tokio::test]
async fn test_upstream_failure_commits_nothing_for_level() {
    let (store, writer, _reader) = setup(vec![BucketSize::Days]);
    let key = steps_key();
    let t = utc_ms(2024, 5, 29, 10, 0);

    writer.record(&key, &Tz::UTC, &[DataPoint::new(t, 100i64)]).await.unwrap();

    store.fail_next_writes(1);
    let err = writer
        .record(&key, &Tz::UTC, &[DataPoint::new(t + 1, 25i64)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Upstream(_)));
    assert_eq!(store.points("steps", &key.tags).len(), 1);

    // raw write goes through, reading the existing bucket fails
    store.fail_next_queries(1);
    assert!(writer
        .record(&key, &Tz::UTC, &[DataPoint::new(t + 2, 25i64)])
        .await
        .unwrap_err()
        .is_upstream());

    let rolled = store.points("steps_daily", &key.tags);
    assert_eq!(rolled[0].value, AggregateValue::Integer(100));

    writer.record(&key, &Tz::UTC, &[DataPoint::new(t + 3, 25i64)]).await.unwrap();
    assert_eq!(store.points("steps_daily", &key.tags)[0].value, AggregateValue::Integer(125));
}

#[tokio::test]
async fn test_storage_key_round_trip_across_zones() {
    let shift = UtcShift::default();
    let zones = [Tz::Asia__Kolkata, Tz::Asia__Kathmandu, Tz::America__New_York];
    let mut t = utc_ms(2023, 12, 30, 0, 0);
    while t < utc_ms(2024, 12, 31, 0, 0) {
        for tz in &zones {
            for size in BucketSize::ALL {
                let key = shift.to_storage_key(t, tz, size).unwrap();
                assert_eq!(
                    shift.from_storage_key(key, tz, size).unwrap(),
                    bucket_start(t, tz, size).unwrap()
                );
            }
        }
        t += 7 * HOUR + 13 * 60_000;
    }
}
