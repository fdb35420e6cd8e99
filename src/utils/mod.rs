mod logging;

pub use logging::*;

use chrono::{DateTime, Utc};

/// Current wall clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Converts a stored millisecond timestamp back into a `DateTime`
pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}
