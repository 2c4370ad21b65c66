//! Property Tests for Bucketing, Shifting and Alignment
//!
//! Uses property-based testing (proptest) to check bucket boundaries, the
//! running average codec, storage keys and re-alignment across timezones
//! with awkward offsets and DST rules.

use activity_rollups::rollup::bucket::BucketSize;
use chrono_tz::Tz;
use proptest::prelude::*;

// =============================================================================
// Test Data Strategies
// =============================================================================

// 2000-01-01 .. 2100-01-01
const MIN_TS: i64 = 946_684_800_000;
const MAX_TS: i64 = 4_102_444_800_000;

const ZONES: [Tz; 8] = [
    Tz::UTC,
    Tz::Asia__Kolkata,
    Tz::Asia__Kathmandu,
    Tz::America__New_York,
    Tz::America__Santiago,
    Tz::Australia__Lord_Howe,
    Tz::Pacific__Kiritimati,
    Tz::Pacific__Pago_Pago,
];

/// Strategy for timestamps within the supported century
fn timestamp() -> impl Strategy<Value = i64> {
    MIN_TS..MAX_TS
}

/// Strategy for zones: half-hour, quarter-hour, DST, midnight DST, +14 and -11
fn zone() -> impl Strategy<Value = Tz> {
    prop::sample::select(ZONES.to_vec())
}

/// Strategy for every aggregation level
fn size() -> impl Strategy<Value = BucketSize> {
    prop::sample::select(BucketSize::ALL.to_vec())
}

/// Strategy for finite sample values
fn sample_value() -> impl Strategy<Value = f64> {
    prop_oneof![
        // Typical activity readings
        (0.0..10_000.0f64),
        // Values right at a rounding edge
        (-1000i32..1000).prop_map(|i| i as f64 / 1000.0 + 0.0005),
        // Large sums
        (-1e9..1e9f64),
    ]
}

// =============================================================================
// Bucket Boundaries
// =============================================================================

mod bucket_boundaries {
    use super::*;
    use activity_rollups::rollup::bucket::{bucket_end, bucket_start};

    proptest! {
        /// A bucket encloses its timestamp and the next bucket starts right after it
        #[test]
        fn bucket_encloses_timestamp(t in timestamp(), tz in zone(), size in size()) {
            let start = bucket_start(t, &tz, size).unwrap();
            let end = bucket_end(start, size, &tz).unwrap();
            prop_assert!(start <= t);
            prop_assert!(t <= end);
            prop_assert_eq!(bucket_start(start, &tz, size).unwrap(), start);
            prop_assert_eq!(bucket_start(end + 1, &tz, size).unwrap(), end + 1);
        }
    }
}

// =============================================================================
// Running Average Codec
// =============================================================================

mod running_average {
    use super::*;
    use activity_rollups::rollup::average::{average, decode, encode, round3};

    proptest! {
        /// Decoding returns the rounded sum and the exact weight
        #[test]
        fn codec_roundtrip(sum in sample_value(), weight in 1u32..1_000_000) {
            let pair = decode(&encode(sum, weight).unwrap()).unwrap();
            prop_assert_eq!(pair.sum, round3(sum));
            prop_assert_eq!(pair.weight, weight);
        }

        /// The average of one sample is the sample, rounded
        #[test]
        fn single_sample_average(x in sample_value()) {
            prop_assert_eq!(average(&encode(x, 1).unwrap()).unwrap(), round3(x));
        }
    }
}

// =============================================================================
// Storage Keys
// =============================================================================

mod storage_keys {
    use super::*;
    use activity_rollups::rollup::bucket::bucket_start;
    use activity_rollups::rollup::UtcShift;

    proptest! {
        /// A storage key decodes back to the start of its bucket
        #[test]
        fn key_roundtrip(t in timestamp(), tz in zone(), size in size()) {
            let shift = UtcShift::default();
            let key = shift.to_storage_key(t, &tz, size).unwrap();
            prop_assert_eq!(
                shift.from_storage_key(key, &tz, size).unwrap(),
                bucket_start(t, &tz, size).unwrap()
            );
        }

        /// A key never lies after the instant its bucket starts
        #[test]
        fn key_not_after_bucket_start(t in timestamp(), tz in zone(), size in size()) {
            let key = UtcShift::default().to_storage_key(t, &tz, size).unwrap();
            prop_assert!(key <= bucket_start(t, &tz, size).unwrap());
        }
    }
}

// =============================================================================
// Alignment
// =============================================================================

mod alignment {
    use super::*;
    use activity_rollups::rollup::aligner::BucketAligner;

    // 2024-01-01T00:00Z
    const BEGIN: i64 = 1_704_067_200_000;
    const SPAN: i64 = 90 * 86_400_000;

    proptest! {
        /// Aligning aligned output again changes nothing
        #[test]
        fn aligned_output_is_fixed_point(
            offsets in prop::collection::vec((0i64..SPAN, 1i64..1000), 0..40),
            size in prop::sample::select(vec![
                BucketSize::Hours,
                BucketSize::Days,
                BucketSize::Weeks,
                BucketSize::Months,
            ]),
        ) {
            let points: Vec<(i64, i64)> = offsets.iter().map(|&(o, v)| (BEGIN + o, v)).collect();

            let aligner = BucketAligner::new(size);
            let once = aligner.align(BEGIN, Some(BEGIN + SPAN), &points).unwrap();
            let twice = aligner.align(BEGIN, Some(BEGIN + SPAN), &once.to_pairs()).unwrap();
            prop_assert_eq!(&once.buckets, &twice.buckets);
            prop_assert_eq!(twice.collisions, 0);
            prop_assert_eq!(twice.out_of_range, 0);
        }
    }
}
