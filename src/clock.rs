// src/clock.rs
//! Report-timezone helpers. The digest is keyed to UTC+8 (the feeds and
//! push schedule are Beijing-time), so every "today" decision goes
//! through this module instead of the host timezone.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};

/// Fixed report offset: UTC+8.
pub fn report_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("UTC+8 is a valid offset")
}

/// Current time in the report timezone.
pub fn report_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&report_offset())
}

/// Current UNIX time in milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// `YYYYMMDD` key for a datetime, used for storage keys.
pub fn date_key(dt: &DateTime<FixedOffset>) -> String {
    dt.format("%Y%m%d").to_string()
}

/// `YYYYMMDD` key for today, report timezone.
pub fn today_key() -> String {
    date_key(&report_now())
}

/// `YYYYMMDD` key for an epoch-milliseconds timestamp, report timezone.
pub fn date_key_of_millis(ms: i64) -> Option<String> {
    let dt = report_offset().timestamp_millis_opt(ms).single()?;
    Some(date_key(&dt))
}
