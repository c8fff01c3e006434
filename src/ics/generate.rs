//! ICS file generation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use icalendar::{
    Alarm, Calendar, CalendarDateTime, Component, EventLike, Property, Trigger, ValueType,
};
use kuna_core::entry::EntryFields;

fn utc_stamp(at: &DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Add DTSTART/DTEND, as floating dates for all-day entries.
fn add_time_property(ics_event: &mut icalendar::Event, name: &str, at: &DateTime<Utc>, all_day: bool) {
    if all_day {
        let mut prop = Property::new(name, at.format("%Y%m%d").to_string());
        prop.append_parameter(ValueType::Date);
        ics_event.append_property(prop);
    } else {
        ics_event.add_property(name, utc_stamp(at));
    }
}

/// Generate .ics content for an entry.
///
/// `modified` becomes both DTSTAMP and LAST-MODIFIED so that regenerating
/// an unchanged entry at the same instant yields identical output.
pub fn generate_ics(uid: &str, fields: &EntryFields, modified: DateTime<Utc>) -> Result<String> {
    let mut cal = Calendar::new();

    let stamp = utc_stamp(&modified);

    let mut ics_event = icalendar::Event::new();
    ics_event.uid(uid);
    ics_event.summary(&fields.title);
    ics_event.add_property("DTSTAMP", &stamp);
    ics_event.add_property("LAST-MODIFIED", &stamp);

    add_time_property(&mut ics_event, "DTSTART", &fields.start, fields.all_day);
    add_time_property(&mut ics_event, "DTEND", &fields.end, fields.all_day);

    if let Some(ref notes) = fields.notes {
        ics_event.description(notes);
    }

    if let Some(ref url) = fields.url {
        ics_event.add_property("URL", url);
    }

    // Absolute triggers, with deterministic UIDs so the icalendar crate
    // does not generate random ones
    for at in &fields.reminders {
        let trigger = Trigger::DateTime(CalendarDateTime::Utc(*at));
        let mut alarm = Alarm::display(&fields.title, trigger);
        alarm.add_property("UID", format!("{}_alarm_{}", uid, at.timestamp()));
        alarm.add_property("DTSTAMP", &stamp);
        ics_event.alarm(alarm);
    }

    let ics_event = ics_event.done();
    cal.push(ics_event);
    let cal = cal.done();

    Ok(cal.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fields() -> EntryFields {
        EntryFields {
            title: "Write report".to_string(),
            notes: Some("Quarterly numbers\nKUNA_EVENT: task=42 project=7".to_string()),
            url: Some("kuna://task/42?project=7".to_string()),
            start: Utc.with_ymd_and_hms(2025, 3, 20, 15, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 3, 20, 16, 0, 0).unwrap(),
            all_day: false,
            reminders: vec![],
        }
    }

    fn modified() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn timed_entry_uses_utc_datetimes() {
        let ics = generate_ics("abc", &fields(), modified()).unwrap();

        assert!(ics.contains("DTSTART:20250320T150000Z"), "ICS:\n{}", ics);
        assert!(ics.contains("DTEND:20250320T160000Z"), "ICS:\n{}", ics);
        assert!(ics.contains("LAST-MODIFIED:20250301T120000Z"), "ICS:\n{}", ics);
        assert!(ics.contains("URL:kuna://task/42?project=7"), "ICS:\n{}", ics);
    }

    #[test]
    fn all_day_entry_has_value_date() {
        let mut all_day = fields();
        all_day.start = Utc.with_ymd_and_hms(2025, 3, 20, 0, 0, 0).unwrap();
        all_day.end = Utc.with_ymd_and_hms(2025, 3, 21, 0, 0, 0).unwrap();
        all_day.all_day = true;

        let ics = generate_ics("abc", &all_day, modified()).unwrap();

        assert!(
            ics.contains("DTSTART;VALUE=DATE:20250320"),
            "DTSTART should have VALUE=DATE parameter. ICS:\n{}",
            ics
        );
        assert!(
            ics.contains("DTEND;VALUE=DATE:20250321"),
            "DTEND should have VALUE=DATE parameter. ICS:\n{}",
            ics
        );
    }

    #[test]
    fn one_alarm_per_reminder() {
        let mut with_alarms = fields();
        with_alarms.reminders = vec![
            Utc.with_ymd_and_hms(2025, 3, 20, 14, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 20, 14, 45, 0).unwrap(),
        ];

        let ics = generate_ics("abc", &with_alarms, modified()).unwrap();

        let alarms = ics.lines().filter(|l| *l == "BEGIN:VALARM").count();
        assert_eq!(alarms, 2, "ICS:\n{}", ics);
    }

    #[test]
    fn output_is_deterministic() {
        let a = generate_ics("abc", &fields(), modified()).unwrap();
        let b = generate_ics("abc", &fields(), modified()).unwrap();
        assert_eq!(a, b);
    }
}
