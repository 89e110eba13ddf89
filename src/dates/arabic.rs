use super::parse::parse_lenient;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

const MONTHS: &[(&str, &str)] = &[
    ("يناير", "January"),
    ("فبراير", "February"),
    ("مارس", "March"),
    ("أبريل", "April"),
    ("ابريل", "April"),
    ("إبريل", "April"),
    ("مايو", "May"),
    ("يونيو", "June"),
    ("يوليو", "July"),
    ("أغسطس", "August"),
    ("اغسطس", "August"),
    ("سبتمبر", "September"),
    ("أكتوبر", "October"),
    ("اكتوبر", "October"),
    ("نوفمبر", "November"),
    ("ديسمبر", "December"),
];

static AM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bص\b").unwrap());
static PM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bم\b").unwrap());
static LEADING_WEEKDAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\x{0600}-\x{06FF}]+،\s*").unwrap());
static ARABIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x{0600}-\x{06FF}]").unwrap());

pub fn contains_arabic(s: &str) -> bool {
    ARABIC.is_match(s)
}

/// Rewrites an Arabic date string into Latin month names and AM/PM markers.
pub fn normalize(raw: &str) -> String {
    let mut s: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '٠'..='٩' => char::from(b'0' + (c as u32 - '٠' as u32) as u8),
            _ => c,
        })
        .collect();

    for (ar, en) in MONTHS {
        s = s.replace(ar, en);
    }
    s = AM.replace_all(&s, "AM").into_owned();
    s = PM.replace_all(&s, "PM").into_owned();
    LEADING_WEEKDAY.replace(&s, "").trim().to_string()
}

pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
    parse_lenient(&normalize(raw))
}
