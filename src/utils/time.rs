// src/utils/time.rs
//
// Calendar-day helpers. Per spec, cadence and idempotence gates operate on
// UTC calendar dates while everything else is a UTC timestamp; keeping the
// distinction in the type system avoids comparing a `NaiveDate` to a
// `DateTime<Utc>` by accident.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// `true` for the weekday that matches `digest_weekday` (0 = Sunday .. 6 =
/// Saturday, matching the platform config convention carried over from
/// `original_source`'s `calendar.day_name` indexing).
pub fn is_configured_weekday(date: NaiveDate, digest_weekday: u8) -> bool {
    date.weekday().num_days_from_sunday() as u8 == digest_weekday
}

/// Days between two dates, inclusive of both endpoints, used to build
/// zero-filled aggregation buckets for the reward aggregator.
pub fn date_range_inclusive(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        dates.push(cursor);
        cursor += chrono::Duration::days(1);
    }
    dates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_matcher_identifies_friday() {
        // 2024-01-05 is a Friday.
        let friday = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert!(is_configured_weekday(friday, 5));
        assert!(!is_configured_weekday(friday, 4));
    }

    #[test]
    fn date_range_inclusive_covers_both_endpoints() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
        let dates = date_range_inclusive(start, end);
        assert_eq!(dates.len(), 7);
        assert_eq!(dates[0], start);
        assert_eq!(dates[6], end);
    }
}
