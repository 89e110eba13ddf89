//! Lenient timestamp parsing. Anything without an offset is taken as UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S %z",
];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d %B %Y %I:%M %p",
    "%d %B %Y %H:%M",
    "%B %d, %Y %I:%M %p",
    "%B %d, %Y %H:%M",
    "%B %d %Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d %B, %Y",
];

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})\b").unwrap());
static DMY_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[-/.](\d{1,2})[-/.](\d{4})\b").unwrap());
static DAY_MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?,?\s+(\d{4})\b").unwrap()
});
static MONTH_DAY_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b").unwrap()
});
static CLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2}):(\d{2})(?::(\d{2}))?\s*(am|pm)?\b").unwrap());

/// A clock time must start within this many characters after the date.
const CLOCK_WINDOW: usize = 16;

const MONTHS: [&str; 12] = ["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"];

/// Parses `raw` as a timestamp, trying strict forms first and then looking
/// for a date embedded in surrounding text.
pub fn parse_lenient(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    parse_exact(s).or_else(|| parse_fuzzy(s))
}

fn parse_exact(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return at_midnight(d);
        }
    }
    // after the naive forms so a trailing AM/PM is never read as a zone name
    DateTime::parse_from_rfc2822(s).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Finds the first plausible calendar date inside free text, together with a
/// clock time that closely follows it, if any.
pub fn parse_fuzzy(s: &str) -> Option<DateTime<Utc>> {
    let (date, end) = find_date(s)?;
    let rest = &s[end..];
    let limit = rest.char_indices().nth(CLOCK_WINDOW).map_or(rest.len(), |(i, _)| i);
    let time = CLOCK.captures(rest).filter(|c| c.get(0).is_some_and(|m| m.start() <= limit)).and_then(|c| {
        let mut hour: u32 = c[1].parse().ok()?;
        let minute: u32 = c[2].parse().ok()?;
        let second: u32 = c.get(3).map_or(Some(0), |m| m.as_str().parse().ok())?;
        match c.get(4).map(|m| m.as_str().to_ascii_lowercase()) {
            Some(ref p) if p == "pm" && hour < 12 => hour += 12,
            Some(ref p) if p == "am" && hour == 12 => hour = 0,
            _ => {}
        }
        NaiveTime::from_hms_opt(hour, minute, second)
    });
    match time {
        Some(t) => Some(Utc.from_utc_datetime(&date.and_time(t))),
        None => at_midnight(date),
    }
}

/// Earliest-positioned date match in `s` and the byte offset where it ends.
fn find_date(s: &str) -> Option<(NaiveDate, usize)> {
    let mut found: Vec<(usize, usize, NaiveDate)> = Vec::new();

    for c in ISO_DATE.captures_iter(s) {
        if let Some(d) = ymd(&c[1], &c[2], &c[3]) {
            let m = c.get(0)?;
            found.push((m.start(), m.end(), d));
        }
    }
    for c in DMY_DATE.captures_iter(s) {
        if let Some(d) = ymd(&c[3], &c[2], &c[1]) {
            let m = c.get(0)?;
            found.push((m.start(), m.end(), d));
        }
    }
    for c in DAY_MONTH_YEAR.captures_iter(s) {
        if let Some(d) = month_name(&c[2]).and_then(|mo| ymd(&c[3], &mo.to_string(), &c[1])) {
            let m = c.get(0)?;
            found.push((m.start(), m.end(), d));
        }
    }
    for c in MONTH_DAY_YEAR.captures_iter(s) {
        if let Some(d) = month_name(&c[1]).and_then(|mo| ymd(&c[3], &mo.to_string(), &c[2])) {
            let m = c.get(0)?;
            found.push((m.start(), m.end(), d));
        }
    }

    found.into_iter().min_by_key(|(start, _, _)| *start).map(|(_, end, d)| (d, end))
}

fn ymd(y: &str, m: &str, d: &str) -> Option<NaiveDate> {
    let year: i32 = y.parse().ok()?;
    if !(1900..=2100).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, m.parse().ok()?, d.parse().ok()?)
}

fn month_name(s: &str) -> Option<u32> {
    let prefix = s.get(..3)?.to_ascii_lowercase();
    MONTHS.iter().position(|m| *m == prefix).map(|i| i as u32 + 1)
}

fn at_midnight(d: NaiveDate) -> Option<DateTime<Utc>> {
    d.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt))
}
