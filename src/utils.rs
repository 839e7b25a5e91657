//! Utility functions for date normalization and log formatting.

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};

/// Truncate a local timestamp to midnight of the same local day.
///
/// This is the key entries are stored under. The result is expressed in
/// UTC because that is how the store persists datetimes.
///
/// When midnight does not exist locally (a DST jump at 00:00) the earliest
/// valid instant of that day is used instead.
pub fn normalize_date(tm: DateTime<Local>) -> DateTime<Utc> {
    midnight_of(tm.date_naive()).unwrap_or_else(|| tm.with_timezone(&Utc))
}

/// Local midnight of a calendar day, in UTC.
pub fn midnight_of(day: NaiveDate) -> Option<DateTime<Utc>> {
    let naive = day.and_hms_opt(0, 0, 0)?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            // 00:00 skipped by DST; take the first hour that exists
            day.and_hms_opt(1, 0, 0)
                .and_then(|n| Local.from_local_datetime(&n).earliest())
        })
        .map(|dt| dt.with_timezone(&Utc))
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` bytes (backing off to a char boundary)
/// with an ellipsis and the number of dropped bytes appended.
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log("a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}
