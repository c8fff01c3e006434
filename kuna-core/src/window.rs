//! Date window used to enumerate and bound mirrored entries.

use chrono::{DateTime, Duration, Utc};

use crate::dates::EntryTimes;

/// Closed date range `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl SyncWindow {
    /// `past` before and `future` after `now`.
    pub fn around(now: DateTime<Utc>, past: Duration, future: Duration) -> Self {
        SyncWindow {
            from: now - past,
            to: now + future,
        }
    }

    /// Effectively unbounded. Used when cleaning up everything we own.
    pub fn everything() -> Self {
        SyncWindow {
            from: DateTime::<Utc>::UNIX_EPOCH,
            to: DateTime::<Utc>::UNIX_EPOCH + Duration::days(365 * 200),
        }
    }

    /// Whether an entry spanning `times` overlaps the window. An entry
    /// outside the window is invisible to enumeration, so it must not be
    /// desired either or it would be created again on every pass.
    pub fn overlaps(&self, times: &EntryTimes) -> bool {
        times.start <= self.to && times.end >= self.from
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn overlap_is_inclusive_at_both_edges() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let window = SyncWindow::around(now, Duration::days(10), Duration::days(10));

        let span = |from: DateTime<Utc>, hours: i64| EntryTimes {
            start: from,
            end: from + Duration::hours(hours),
            all_day: false,
        };

        assert!(window.overlaps(&span(window.to, 1)));
        assert!(window.overlaps(&span(window.from - Duration::hours(1), 1)));
        assert!(!window.overlaps(&span(window.to + Duration::hours(1), 1)));
        assert!(!window.overlaps(&span(window.from - Duration::hours(3), 1)));
    }
}
