use activity_rollups::config::MetricDefinition;
use activity_rollups::ingestion::RollupWriter;
use activity_rollups::rollup::AggregationRule;
use activity_rollups::rollup::aligner::BucketAligner;
use activity_rollups::rollup::bucket::{bucket_start, BucketSize};
use activity_rollups::rollup::UtcShift;
use activity_rollups::store::InMemoryStore;
use activity_rollups::types::{DataPoint, SeriesKey};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use chrono_tz::Tz;
use std::sync::Arc;

// 2024-01-01T00:00Z
const BEGIN: i64 = 1_704_067_200_000;
const DAY: i64 = 86_400_000;

fn create_points(count: usize, span: i64) -> Vec<(i64, i64)> {
    (0..count)
        .map(|i| (BEGIN + (i as i64 * 7_919_333) % span, (i % 500) as i64))
        .collect()
}

fn bench_align(c: &mut Criterion) {
    let mut group = c.benchmark_group("align");

    for (size, span) in [
        (BucketSize::Hours, 30 * DAY),
        (BucketSize::Days, 365 * DAY),
        (BucketSize::Months, 10 * 365 * DAY),
    ] {
        let points = create_points(10_000, span);
        let aligner = BucketAligner::new(size);
        group.throughput(Throughput::Elements(points.len() as u64));
        group.bench_with_input(BenchmarkId::new("dense", size.as_str()), &points, |b, points| {
            b.iter(|| black_box(aligner.align(BEGIN, Some(BEGIN + span), points).unwrap()))
        });
    }

    group.finish();
}

fn bench_bucket_start(c: &mut Criterion) {
    let mut group = c.benchmark_group("bucket_start");
    let timestamps: Vec<i64> = (0..1000).map(|i| BEGIN + i * 3_599_017).collect();

    for tz in [Tz::UTC, Tz::Asia__Kathmandu, Tz::America__New_York] {
        for size in [BucketSize::Hours, BucketSize::Weeks] {
            group.throughput(Throughput::Elements(timestamps.len() as u64));
            group.bench_with_input(
                BenchmarkId::new(size.as_str(), tz.name()),
                &timestamps,
                |b, timestamps| {
                    b.iter(|| {
                        for &t in timestamps {
                            black_box(bucket_start(t, &tz, size).unwrap());
                        }
                    })
                },
            );
        }
    }

    group.finish();
}

fn bench_record(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let writer = RollupWriter::new(
        Arc::new(InMemoryStore::new()),
        BucketSize::ALL.to_vec(),
        UtcShift::default(),
        &[MetricDefinition::new("steps", AggregationRule::Sum)],
    );
    let key = SeriesKey::new("steps").with_tag("device", "bench");
    let batch: Vec<DataPoint> = (0..100)
        .map(|i| DataPoint::new(BEGIN + i * 60_000, 12i64))
        .collect();

    c.bench_function("record_100_points_all_levels", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(writer.record(&key, &Tz::Europe__Berlin, &batch).await.unwrap())
            })
        })
    });
}

criterion_group!(benches, bench_align, bench_bucket_start, bench_record);
criterion_main!(benches);
