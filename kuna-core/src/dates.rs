//! Mapping task dates onto calendar entry times.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::task::Task;

/// Concrete times for a calendar entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryTimes {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
}

/// Length of the window used when a task only has one date.
pub fn default_span() -> Duration {
    Duration::hours(1)
}

/// Map a task's start/due/done state to entry times.
///
/// Precedence:
/// 1. start and due: `(start, due)`
/// 2. due only, done: all-day on the due date (in `tz`)
/// 3. due only, open: the hour ending at due
/// 4. start only: the hour starting at start
/// 5. neither: `None`, the task gets no entry
pub fn map_dates(task: &Task, tz: Tz) -> Option<EntryTimes> {
    match (task.start, task.due) {
        (Some(start), Some(due)) => Some(EntryTimes {
            start,
            // A due date before the start is clamped to it, giving an empty
            // span instead of a negative one.
            end: due.max(start),
            all_day: false,
        }),
        (None, Some(due)) if task.done => Some(all_day_on(due, tz)),
        (None, Some(due)) => Some(EntryTimes {
            start: due - default_span(),
            end: due,
            all_day: false,
        }),
        (Some(start), None) => Some(EntryTimes {
            start,
            end: start + default_span(),
            all_day: false,
        }),
        (None, None) => None,
    }
}

/// All-day span covering the calendar day of `at` in `tz`.
///
/// All-day entries are expressed as midnight-to-midnight UTC on that date;
/// store adapters write them as floating dates.
pub fn all_day_on(at: DateTime<Utc>, tz: Tz) -> EntryTimes {
    let date = at.with_timezone(&tz).date_naive();
    let start = date.and_time(NaiveTime::MIN).and_utc();
    EntryTimes {
        start,
        end: start + Duration::days(1),
        all_day: true,
    }
}
