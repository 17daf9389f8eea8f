//! Property tests for normalization invariants.
//!
//! 1. Round trip: render → parse → render is the identity for canonical formats
//! 2. Flooring is idempotent and never moves a timestamp forward
//! 3. Cleaned frames are sorted ascending and free of exact duplicates

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;
use tempest_core::dates::{floor_to_hour, parse_datetime, string_values, CanonicalFormat};
use tempest_core::transform::clean_frame;

// ── Strategies ───────────────────────────────────────────────────────

fn arb_datetime() -> impl Strategy<Value = NaiveDateTime> {
    (2000i32..2040, 1u32..=12, 1u32..=28, 0u32..24, 0u32..60, 0u32..60).prop_map(
        |(y, mo, d, h, mi, s)| {
            NaiveDate::from_ymd_opt(y, mo, d)
                .and_then(|date| date.and_hms_opt(h, mi, s))
                .unwrap()
        },
    )
}

fn arb_format() -> impl Strategy<Value = CanonicalFormat> {
    prop_oneof![
        Just(CanonicalFormat::Date),
        Just(CanonicalFormat::Minute),
        Just(CanonicalFormat::Second),
    ]
}

// ── 1. Round trip ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn canonical_rendering_round_trips(dt in arb_datetime(), format in arb_format()) {
        let rendered = format.render(dt);
        let parsed = parse_datetime(&rendered);
        prop_assert!(parsed.is_some(), "could not re-parse {}", rendered);
        prop_assert_eq!(format.render(parsed.unwrap()), rendered);
    }

    #[test]
    fn second_format_preserves_the_instant(dt in arb_datetime()) {
        prop_assert_eq!(parse_datetime(&CanonicalFormat::Second.render(dt)), Some(dt));
    }
}

// ── 2. Flooring ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn floor_is_idempotent_and_monotone(dt in arb_datetime()) {
        let floored = floor_to_hour(dt);
        prop_assert!(floored <= dt);
        prop_assert_eq!(floor_to_hour(floored), floored);
        prop_assert!(dt - floored < chrono::Duration::hours(1));
    }
}

// ── 3. Cleaner output ────────────────────────────────────────────────

proptest! {
    #[test]
    fn cleaned_rows_are_sorted_and_unique(
        rows in prop::collection::vec((arb_datetime(), 0i64..3), 1..40)
    ) {
        let times: Vec<String> = rows.iter().map(|(dt, _)| dt.format("%Y-%m-%dT%H:%M:%S").to_string()).collect();
        let values: Vec<i64> = rows.iter().map(|(_, v)| *v).collect();
        let df = df!("timestamp" => times, "v" => values).unwrap();

        let out = clean_frame(df, "timestamp", CanonicalFormat::Second).unwrap();

        let keys: Vec<String> = string_values(&out, "timestamp")
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        prop_assert!(keys.windows(2).all(|w| w[0] <= w[1]));

        let vs: Vec<i64> = out
            .column("v")
            .unwrap()
            .as_materialized_series()
            .i64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        let distinct: HashSet<(&String, i64)> = keys.iter().zip(vs.iter().copied()).collect();
        prop_assert_eq!(distinct.len(), out.height());
    }
}
