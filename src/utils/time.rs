use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use chrono::TimeZone;

/// Layout of observation times in the log view, e.g. `Jan-02 15:04:05`
pub const WATCH_TIME_FORMAT: &str = "%b-%d %H:%M:%S";

/// return nanoseconds since the UNIX epoch
pub fn now_as_nanos() -> i64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(since_epoch.as_nanos()).unwrap_or(i64::MAX)
}

/// Formats a nanosecond UNIX timestamp in the given time zone
pub fn format_watch_time<Tz>(
    nanos: i64,
    tz: &Tz,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    tz.timestamp_nanos(nanos).format(WATCH_TIME_FORMAT).to_string()
}
