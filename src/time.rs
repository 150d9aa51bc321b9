use chrono::{NaiveDate, Utc};

/// Epoch milliseconds, the unit every `updated_at` column is stored in.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parses the ISO calendar dates stored in `Date` columns.
pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}
