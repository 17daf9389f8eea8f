//! Date normalization shared by cleaners and enrichers.
//!
//! Sources disagree on timestamp layout (`2024-01-01T05:42:00Z`,
//! `2024-01-01 05:42`, `01/02/2024`, ...). Everything is parsed to a naive
//! UTC instant, then re-rendered in one of the [`CanonicalFormat`]s so hourly
//! weather and hourly stock series land on identical join keys.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use polars::prelude::*;

/// Fixed string rendering used to persist a temporal value after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalFormat {
    /// `%Y-%m-%d`
    Date,
    /// `%Y-%m-%d %H:%M`
    Minute,
    /// `%Y-%m-%d %H:%M:%S`
    Second,
}

impl CanonicalFormat {
    pub fn pattern(self) -> &'static str {
        match self {
            CanonicalFormat::Date => "%Y-%m-%d",
            CanonicalFormat::Minute => "%Y-%m-%d %H:%M",
            CanonicalFormat::Second => "%Y-%m-%d %H:%M:%S",
        }
    }

    pub fn render(self, value: NaiveDateTime) -> String {
        value.format(self.pattern()).to_string()
    }
}

const DATETIME_PATTERNS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const OFFSET_PATTERNS: &[&str] = &["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%z"];

const DATE_PATTERNS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Parse one timestamp. Offsets are converted to UTC; date-only values map to midnight.
///
/// Returns `None` for anything unrecognised (the caller decides whether that is a null).
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for pattern in OFFSET_PATTERNS {
        if let Ok(dt) = DateTime::parse_from_str(s, pattern) {
            return Some(dt.naive_utc());
        }
    }
    for pattern in DATETIME_PATTERNS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, pattern) {
            return Some(dt);
        }
    }
    DATE_PATTERNS
        .iter()
        .find_map(|pattern| NaiveDate::parse_from_str(s, pattern).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Truncate to the start of the containing hour.
pub fn floor_to_hour(value: NaiveDateTime) -> NaiveDateTime {
    value.date().and_hms_opt(value.hour(), 0, 0).unwrap_or(value)
}

/// Values of `column` as strings (non-string columns are cast first).
pub fn string_values(df: &DataFrame, column: &str) -> PolarsResult<Vec<Option<String>>> {
    let series = df
        .column(column)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_owned))
        .collect())
}

/// Parse every value of `column`. Unparsable entries become `None` rather than failing.
pub fn parse_column(df: &DataFrame, column: &str) -> PolarsResult<Vec<Option<NaiveDateTime>>> {
    Ok(string_values(df, column)?
        .iter()
        .map(|v| v.as_deref().and_then(parse_datetime))
        .collect())
}

/// Rewrite `column` in place as canonical strings.
pub fn format_date(df: &mut DataFrame, column: &str, format: CanonicalFormat) -> PolarsResult<()> {
    let rendered: Vec<Option<String>> = parse_column(df, column)?
        .into_iter()
        .map(|v| v.map(|dt| format.render(dt)))
        .collect();
    df.with_column(Column::new(column.into(), rendered))?;
    Ok(())
}

/// Floor `column` to the hour and render with seconds.
///
/// Writes to `target` when given (a new column), otherwise overwrites `column`.
pub fn floor_date_to_hour(df: &mut DataFrame, column: &str, target: Option<&str>) -> PolarsResult<()> {
    let floored: Vec<Option<String>> = parse_column(df, column)?
        .into_iter()
        .map(|v| v.map(|dt| CanonicalFormat::Second.render(floor_to_hour(dt))))
        .collect();
    df.with_column(Column::new(target.unwrap_or(column).into(), floored))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn parses_common_layouts() {
        let expected = dt("2024-01-01 05:42:00");
        for raw in [
            "2024-01-01 05:42:00",
            "2024-01-01T05:42:00",
            "2024-01-01T05:42",
            "2024-01-01 05:42",
            "2024-01-01T05:42:00Z",
            "2024-01-01T07:42:00+02:00",
            "2024/01/01 05:42",
            "01/01/2024 05:42:00",
            "  2024-01-01 05:42  ",
        ] {
            assert_eq!(parse_datetime(raw), Some(expected), "failed on {raw:?}");
        }
    }

    #[test]
    fn parses_fractional_seconds() {
        assert_eq!(
            parse_datetime("2024-01-01 05:42:00.250").map(floor_to_hour),
            Some(dt("2024-01-01 05:00:00"))
        );
    }

    #[test]
    fn date_only_maps_to_midnight() {
        assert_eq!(parse_datetime("2024-03-15"), Some(dt("2024-03-15 00:00:00")));
        assert_eq!(parse_datetime("03/15/2024"), Some(dt("2024-03-15 00:00:00")));
    }

    #[test]
    fn garbage_is_none() {
        assert_eq!(parse_datetime(""), None);
        assert_eq!(parse_datetime("not a date"), None);
        assert_eq!(parse_datetime("2024-13-45"), None);
    }

    #[test]
    fn floor_discards_minutes_and_seconds() {
        assert_eq!(floor_to_hour(dt("2024-01-01 05:59:59")), dt("2024-01-01 05:00:00"));
        assert_eq!(floor_to_hour(dt("2024-01-01 05:00:00")), dt("2024-01-01 05:00:00"));
    }

    #[test]
    fn canonical_renderings() {
        let value = dt("2024-01-01 05:42:07");
        assert_eq!(CanonicalFormat::Date.render(value), "2024-01-01");
        assert_eq!(CanonicalFormat::Minute.render(value), "2024-01-01 05:42");
        assert_eq!(CanonicalFormat::Second.render(value), "2024-01-01 05:42:07");
    }

    #[test]
    fn weather_and_stock_floor_to_the_same_bucket() {
        let mut weather = df!("time" => &["2024-01-01T05:42:00"]).unwrap();
        let mut stock = df!("timestamp" => &["2024-01-01T05:10:00"]).unwrap();

        floor_date_to_hour(&mut weather, "time", None).unwrap();
        floor_date_to_hour(&mut stock, "timestamp", None).unwrap();

        let w = string_values(&weather, "time").unwrap();
        let s = string_values(&stock, "timestamp").unwrap();
        assert_eq!(w, s);
        assert_eq!(w[0].as_deref(), Some("2024-01-01 05:00:00"));
    }

    #[test]
    fn floor_into_new_column_keeps_original() {
        let mut df = df!("time" => &["2024-01-01 05:42"]).unwrap();
        floor_date_to_hour(&mut df, "time", Some("hour")).unwrap();

        assert_eq!(string_values(&df, "time").unwrap()[0].as_deref(), Some("2024-01-01 05:42"));
        assert_eq!(
            string_values(&df, "hour").unwrap()[0].as_deref(),
            Some("2024-01-01 05:00:00")
        );
    }

    #[test]
    fn format_date_coerces_unparsable_to_null() {
        let mut df = df!("date" => &["2024-01-02T00:00:00", "n/a"]).unwrap();
        format_date(&mut df, "date", CanonicalFormat::Date).unwrap();

        let values = string_values(&df, "date").unwrap();
        assert_eq!(values, vec![Some("2024-01-02".to_string()), None]);
    }

    #[test]
    fn missing_column_is_an_error() {
        let mut df = df!("a" => &[1i64]).unwrap();
        assert!(format_date(&mut df, "time", CanonicalFormat::Second).is_err());
    }
}
