use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

/// The trailing time range a run counts commits in. Inclusive at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub days: u32,
}

impl TimeWindow {
    /// `[now - days, now]`, starting at the earliest representable instant if `days`
    /// reaches past it.
    pub fn trailing(now: DateTime<Utc>, days: u32) -> Self {
        TimeWindow {
            start: now
                .checked_sub_signed(Duration::days(i64::from(days)))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: now,
            days,
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }

    pub fn is_before(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp < self.start
    }

    pub fn scan_date(&self) -> NaiveDate {
        self.end.date_naive()
    }
}
