//! ICS file parsing.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use kuna_core::entry::EntryFields;

/// An entry read back from an .ics file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntry {
    pub uid: String,
    pub fields: EntryFields,
    pub last_modified: Option<DateTime<Utc>>,
}

/// A DTSTART/DTEND value.
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcsTime {
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl IcsTime {
    fn to_utc(self) -> DateTime<Utc> {
        match self {
            IcsTime::Date(d) => d.and_time(NaiveTime::MIN).and_utc(),
            IcsTime::DateTime(dt) => dt,
        }
    }
}

/// Alarm trigger, either absolute or relative to the entry start.
enum IcsTrigger {
    At(DateTime<Utc>),
    BeforeStart(Duration),
}

/// Parse ICS content into an entry. Returns `None` if there is no VEVENT
/// with at least a UID and a start.
pub fn parse_entry(content: &str) -> Option<ParsedEntry> {
    let mut in_vevent = false;
    let mut in_valarm = false;

    let mut uid = None;
    let mut summary = None;
    let mut description = None;
    let mut url = None;
    let mut dtstart = None;
    let mut dtend = None;
    let mut last_modified = None;
    let mut triggers = Vec::new();

    for line in unfold(content) {
        match line.as_str() {
            "BEGIN:VEVENT" => in_vevent = true,
            "END:VEVENT" => in_vevent = false,
            "BEGIN:VALARM" => in_valarm = true,
            "END:VALARM" => in_valarm = false,
            _ if !in_vevent => {}
            _ => {
                let Some((key, params, value)) = parse_property_line_with_params(&line) else {
                    continue;
                };
                if in_valarm {
                    if key == "TRIGGER"
                        && let Some(trigger) = parse_trigger(&value, &params)
                    {
                        triggers.push(trigger);
                    }
                    continue;
                }
                match key.as_str() {
                    "UID" => uid = Some(value),
                    "SUMMARY" => summary = Some(value),
                    "DESCRIPTION" => description = Some(value),
                    "URL" => url = Some(value),
                    "DTSTART" => dtstart = parse_datetime(&value, &params),
                    "DTEND" => dtend = parse_datetime(&value, &params),
                    "LAST-MODIFIED" => last_modified = parse_datetime(&value, &params),
                    _ => {}
                }
            }
        }
    }

    let uid = uid?;
    let start = dtstart?;
    let all_day = matches!(start, IcsTime::Date(_));
    let start = start.to_utc();
    let end = match dtend {
        Some(end) => end.to_utc(),
        None if all_day => start + Duration::days(1),
        None => start,
    };

    let mut reminders: Vec<DateTime<Utc>> = triggers
        .into_iter()
        .map(|t| match t {
            IcsTrigger::At(at) => at,
            IcsTrigger::BeforeStart(before) => start - before,
        })
        .collect();
    reminders.sort();

    Some(ParsedEntry {
        uid,
        fields: EntryFields {
            title: summary.unwrap_or_default(),
            notes: description.filter(|d| !d.is_empty()),
            url,
            start,
            end,
            all_day,
            reminders,
        },
        last_modified: last_modified.map(IcsTime::to_utc),
    })
}

/// Join folded lines (RFC 5545: continuation lines start with a single
/// space or tab). Only the first character of a continuation is removed.
fn unfold(content: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix(' ').or_else(|| line.strip_prefix('\t'))
            && let Some(last) = lines.last_mut()
        {
            last.push_str(rest);
            continue;
        }
        lines.push(line.to_string());
    }
    lines
}

/// Parse a single ICS property line into key, parameters, and value
fn parse_property_line_with_params(line: &str) -> Option<(String, String, String)> {
    let colon_pos = line.find(':')?;
    let key_part = &line[..colon_pos];
    let value = &line[colon_pos + 1..];

    let mut parts = key_part.splitn(2, ';');
    let key = parts.next()?.to_ascii_uppercase();
    let params = parts.next().unwrap_or("").to_string();

    Some((key, params, unescape_ics_value(value)))
}

/// Unescape ICS property values per RFC 5545
/// Reverses: \, → , and \; → ; and \\ → \ and \n → newline
fn unescape_ics_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.peek() {
            Some(&escaped) if matches!(escaped, ',' | ';' | '\\') => {
                result.push(escaped);
                chars.next();
            }
            Some('n') | Some('N') => {
                result.push('\n');
                chars.next();
            }
            _ => result.push(c),
        }
    }

    result
}

fn param<'a>(params: &'a str, name: &str) -> Option<&'a str> {
    params
        .split(';')
        .find_map(|p| p.split_once('=').filter(|(k, _)| k.eq_ignore_ascii_case(name)))
        .map(|(_, v)| v.trim_matches('"'))
}

/// Parse a date or datetime value. Zoned values are converted to UTC;
/// floating ones are read as UTC.
fn parse_datetime(value: &str, params: &str) -> Option<IcsTime> {
    let is_date = param(params, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"));

    if is_date || (value.len() == 8 && value.chars().all(|c| c.is_ascii_digit())) {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
        return Some(IcsTime::Date(date));
    }

    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some(IcsTime::DateTime(naive.and_utc()));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    let zoned = param(params, "TZID")
        .and_then(|tzid| tzid.parse::<Tz>().ok())
        .and_then(|tz| tz.from_local_datetime(&naive).earliest())
        .map(|dt| dt.with_timezone(&Utc));

    Some(IcsTime::DateTime(zoned.unwrap_or_else(|| naive.and_utc())))
}

fn parse_trigger(value: &str, params: &str) -> Option<IcsTrigger> {
    let is_absolute = param(params, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE-TIME"));
    if is_absolute || !value.contains('P') {
        return match parse_datetime(value, "")? {
            IcsTime::DateTime(at) => Some(IcsTrigger::At(at)),
            IcsTime::Date(_) => None,
        };
    }
    parse_trigger_duration(value).map(IcsTrigger::BeforeStart)
}

/// Parse a relative TRIGGER value (`-PT15M`, `-P1D`, `PT0S`...) into the
/// time before start. Triggers after the start come back negative.
fn parse_trigger_duration(value: &str) -> Option<Duration> {
    let is_before = value.starts_with('-');
    let mut rest = value.trim_start_matches(['-', '+']).strip_prefix('P')?;

    let mut total = Duration::zero();
    let mut in_time = false;
    while !rest.is_empty() {
        if let Some(after_t) = rest.strip_prefix('T') {
            in_time = true;
            rest = after_t;
            continue;
        }
        let digits = rest.find(|c: char| !c.is_ascii_digit())?;
        let n: i64 = rest[..digits].parse().ok()?;
        let unit = rest[digits..].chars().next()?;
        total += match (unit, in_time) {
            ('W', false) => Duration::weeks(n),
            ('D', false) => Duration::days(n),
            ('H', true) => Duration::hours(n),
            ('M', true) => Duration::minutes(n),
            ('S', true) => Duration::seconds(n),
            _ => return None,
        };
        rest = &rest[digits + unit.len_utf8()..];
    }

    Some(if is_before { total } else { -total })
}
