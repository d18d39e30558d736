//! Canonical daily-log schema, scalar coercion, and query helpers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "healthlog-core";

/// Canonical column set of the sheet export and the local file, in
/// serialization order.
pub const COLUMNS: [&str; 10] = [
    "date",
    "weight_lbs",
    "surya_namaskar",
    "water_glasses_8oz",
    "fasting_window_hours",
    "breakfast",
    "lunch",
    "dinner",
    "snacks",
    "notes",
];

/// One logged day, uniquely keyed by `date`.
///
/// Numeric fields carry their post-coercion defaults (`None` for weight,
/// zero for the counts); text fields are never null, only empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub weight_lbs: Option<f64>,
    pub surya_namaskar: u32,
    pub water_glasses_8oz: u32,
    pub fasting_window_hours: u32,
    pub breakfast: String,
    pub lunch: String,
    pub dinner: String,
    pub snacks: String,
    pub notes: String,
}

impl DailyRecord {
    /// A record with every field at its load-time default.
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            weight_lbs: None,
            surya_namaskar: 0,
            water_glasses_8oz: 0,
            fasting_window_hours: 0,
            breakfast: String::new(),
            lunch: String::new(),
            dinner: String::new(),
            snacks: String::new(),
            notes: String::new(),
        }
    }
}

fn cleaned(value: Option<&str>) -> Option<&str> {
    let trimmed = value?.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed)
    }
}

/// Integer coercion for dirty sheet cells.
///
/// Absent, blank, whitespace-only, and literal "nan" cells fall back to
/// `default`, as does anything that fails both an integer and a float
/// parse. Float-looking cells truncate toward zero, so "24.0" coerces
/// to 24. Never panics.
pub fn coerce_int(value: Option<&str>, default: i64) -> i64 {
    let Some(cell) = cleaned(value) else {
        return default;
    };
    if let Ok(n) = cell.parse::<i64>() {
        return n;
    }
    match cell.parse::<f64>() {
        Ok(f) if f.is_finite() => f.trunc() as i64,
        _ => default,
    }
}

/// [`coerce_int`] clamped at zero. The repetition/hydration/fasting counts
/// load through this.
pub fn coerce_count(value: Option<&str>, default: u32) -> u32 {
    coerce_int(value, i64::from(default)).clamp(0, i64::from(u32::MAX)) as u32
}

/// Float coercion for dirty sheet cells. Invalid input reads as a missing
/// measurement, not an error and not zero.
pub fn coerce_float(value: Option<&str>) -> Option<f64> {
    let cell = cleaned(value)?;
    match cell.parse::<f64>() {
        Ok(f) if f.is_finite() => Some(f),
        _ => None,
    }
}

/// Text coercion: absent cells become the empty string. Values are not
/// trimmed here; trimming happens in the form layer on submission.
pub fn coerce_text(value: Option<&str>) -> String {
    value.map(ToString::to_string).unwrap_or_default()
}

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"];

/// Parse a date cell in any of the forms the sheet owner tends to type.
///
/// `None` means the whole row is dropped at load time; this is the one
/// place where a bad cell removes the record instead of defaulting a
/// field.
pub fn parse_log_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

/// Records inside `[start, end]`, both bounds inclusive, input order
/// preserved. An empty result is not an error.
pub fn filter_by_date_range(
    records: &[DailyRecord],
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<DailyRecord> {
    records
        .iter()
        .filter(|r| r.date >= start && r.date <= end)
        .cloned()
        .collect()
}

pub fn earliest(records: &[DailyRecord]) -> Option<&DailyRecord> {
    records.iter().min_by_key(|r| r.date)
}

pub fn latest(records: &[DailyRecord]) -> Option<&DailyRecord> {
    records.iter().max_by_key(|r| r.date)
}

/// Latest-minus-earliest weight. A missing endpoint is never treated as
/// zero, so the delta is `None` unless both endpoints carry a value.
pub fn weight_delta(records: &[DailyRecord]) -> Option<f64> {
    let first = earliest(records)?.weight_lbs?;
    let last = latest(records)?.weight_lbs?;
    Some(last - first)
}

/// The dashboard metric row, derived from a loaded collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub entries: usize,
    pub latest_date: Option<NaiveDate>,
    pub latest_weight_lbs: Option<f64>,
    pub weight_delta_lbs: Option<f64>,
    pub latest_surya_namaskar: Option<u32>,
    pub latest_water_glasses: Option<u32>,
    pub latest_fasting_hours: Option<u32>,
}

impl Summary {
    pub fn of(records: &[DailyRecord]) -> Self {
        let last = latest(records);
        Self {
            entries: records.len(),
            latest_date: last.map(|r| r.date),
            latest_weight_lbs: last.and_then(|r| r.weight_lbs),
            weight_delta_lbs: weight_delta(records),
            latest_surya_namaskar: last.map(|r| r.surya_namaskar),
            latest_water_glasses: last.map(|r| r.water_glasses_8oz),
            latest_fasting_hours: last.map(|r| r.fasting_window_hours),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("test date")
    }

    fn weighted(day: &str, weight: Option<f64>) -> DailyRecord {
        DailyRecord {
            weight_lbs: weight,
            ..DailyRecord::empty(date(day))
        }
    }

    #[test]
    fn blank_and_nan_cells_coerce_to_defaults() {
        for cell in [Some(""), Some("   "), Some("nan"), Some("NaN"), Some(" NAN ")] {
            assert_eq!(coerce_int(cell, 7), 7);
            assert_eq!(coerce_float(cell), None);
        }
        assert_eq!(coerce_int(None, 0), 0);
        assert_eq!(coerce_float(None), None);
    }

    #[test]
    fn integer_coercion_truncates_float_cells() {
        assert_eq!(coerce_int(Some("24.0"), 0), 24);
        assert_eq!(coerce_int(Some("24.9"), 0), 24);
        assert_eq!(coerce_int(Some("-3.7"), 0), -3);
        assert_eq!(coerce_int(Some("12"), 0), 12);
        assert_eq!(coerce_int(Some(""), 5), 5);
        assert_eq!(coerce_int(Some("twelve"), 5), 5);
        assert_eq!(coerce_int(Some("inf"), 5), 5);
    }

    #[test]
    fn count_coercion_never_goes_negative() {
        assert_eq!(coerce_count(Some("-4"), 0), 0);
        assert_eq!(coerce_count(Some("16.0"), 0), 16);
        assert_eq!(coerce_count(Some("bogus"), 3), 3);
    }

    #[test]
    fn float_coercion_parses_or_reads_missing() {
        assert_eq!(coerce_float(Some("150.5")), Some(150.5));
        assert_eq!(coerce_float(Some("abc")), None);
        assert_eq!(coerce_float(Some(" 180.2 ")), Some(180.2));
    }

    #[test]
    fn text_coercion_preserves_whitespace() {
        assert_eq!(coerce_text(None), "");
        assert_eq!(coerce_text(Some("  eggs ")), "  eggs ");
    }

    #[test]
    fn log_dates_accept_common_sheet_forms() {
        assert_eq!(parse_log_date("2024-01-05"), Some(date("2024-01-05")));
        assert_eq!(parse_log_date("1/5/2024"), Some(date("2024-01-05")));
        assert_eq!(parse_log_date("1/5/24"), Some(date("2024-01-05")));
        assert_eq!(parse_log_date(" 2024-01-05 "), Some(date("2024-01-05")));
        assert_eq!(parse_log_date("Jan 5"), None);
        assert_eq!(parse_log_date(""), None);
    }

    #[test]
    fn date_range_filter_is_inclusive_on_both_bounds() {
        let records = vec![
            weighted("2024-01-03", None),
            weighted("2024-01-05", Some(180.2)),
            weighted("2024-01-09", Some(179.0)),
        ];
        let filtered = filter_by_date_range(&records, date("2024-01-03"), date("2024-01-05"));
        assert_eq!(filtered.len(), 2);

        let single = filter_by_date_range(&records, date("2024-01-05"), date("2024-01-05"));
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].date, date("2024-01-05"));

        let none = filter_by_date_range(&records, date("2023-01-01"), date("2023-12-31"));
        assert!(none.is_empty());
    }

    #[test]
    fn endpoints_are_none_on_empty_collections() {
        assert!(earliest(&[]).is_none());
        assert!(latest(&[]).is_none());
        assert!(weight_delta(&[]).is_none());
    }

    #[test]
    fn weight_delta_requires_both_endpoints() {
        let missing_start = vec![
            weighted("2024-01-01", None),
            weighted("2024-01-02", Some(181.0)),
            weighted("2024-01-03", Some(180.0)),
        ];
        assert_eq!(weight_delta(&missing_start), None);

        let missing_end = vec![
            weighted("2024-01-01", Some(182.0)),
            weighted("2024-01-02", Some(181.0)),
            weighted("2024-01-03", None),
        ];
        assert_eq!(weight_delta(&missing_end), None);

        let both = vec![
            weighted("2024-01-01", Some(182.0)),
            weighted("2024-01-02", None),
            weighted("2024-01-03", Some(180.5)),
        ];
        assert_eq!(weight_delta(&both), Some(-1.5));
    }

    #[test]
    fn summary_reads_the_latest_record() {
        let records = vec![
            DailyRecord {
                surya_namaskar: 4,
                ..weighted("2024-01-01", Some(182.0))
            },
            DailyRecord {
                surya_namaskar: 12,
                water_glasses_8oz: 8,
                fasting_window_hours: 16,
                ..weighted("2024-01-05", Some(180.2))
            },
        ];
        let summary = Summary::of(&records);
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.latest_date, Some(date("2024-01-05")));
        assert_eq!(summary.latest_weight_lbs, Some(180.2));
        assert_eq!(summary.weight_delta_lbs, Some(180.2 - 182.0));
        assert_eq!(summary.latest_surya_namaskar, Some(12));
        assert_eq!(summary.latest_water_glasses, Some(8));
        assert_eq!(summary.latest_fasting_hours, Some(16));

        let empty = Summary::of(&[]);
        assert_eq!(empty.entries, 0);
        assert!(empty.latest_weight_lbs.is_none());
    }
}
