use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

/// Time source and timer for a reconciliation run.
#[allow(async_fn_in_trait)]
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);

    fn now_iso(&self) -> String {
        to_iso(self.now())
    }
}

/// RFC 3339 with millisecond precision and a `Z` suffix, the format every
/// timestamp column is stored in. Lexicographic order matches time order.
pub fn to_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Wall clock of the Workers runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerClock;

impl Clock for WorkerClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(js_sys::Date::now() as i64).unwrap_or_default()
    }

    async fn sleep(&self, duration: Duration) {
        worker::Delay::from(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn iso_format_is_millisecond_zulu() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(to_iso(ts), "2026-03-04T05:06:07.000Z");
    }

    #[test]
    fn iso_strings_sort_chronologically() {
        let earlier = to_iso(Utc.with_ymd_and_hms(2026, 1, 9, 23, 0, 0).unwrap());
        let later = to_iso(Utc.with_ymd_and_hms(2026, 1, 10, 1, 0, 0).unwrap());
        assert!(earlier < later);
    }
}
