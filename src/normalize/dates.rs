// src/normalize/dates.rs
//! Posting-date parsing. Absolute formats first, then relative phrases
//! ("3 days ago", "today") resolved against the run's captured `now`.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%b %d, %Y", "%B %d, %Y", "%d %b %Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];

pub fn parse_posted_at(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    parse_absolute(t).or_else(|| parse_relative(t, now))
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .and_then(|dt| Utc.timestamp_opt(dt.unix_timestamp(), 0).single())
}

pub fn parse_absolute(t: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = parse_rfc2822(t) {
        return Some(dt);
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(t, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|ndt| Utc.from_utc_datetime(&ndt));
        }
    }
    // Unix seconds (10 digits) as some JSON boards emit them.
    if t.len() == 10 && t.bytes().all(|b| b.is_ascii_digit()) {
        return t.parse::<i64>().ok().and_then(|s| Utc.timestamp_opt(s, 0).single());
    }
    None
}

pub fn parse_relative(t: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = t.to_lowercase();
    let lower = lower.trim();
    match lower {
        "now" | "just now" | "today" | "moments ago" | "just posted" | "new" => return Some(now),
        "yesterday" => return Some(now - Duration::days(1)),
        _ => {}
    }

    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(\d+|an?|one)\+?\s*(minute|min|hour|hr|day|week|month|year)s?\s+ago")
            .expect("relative date regex")
    });
    let caps = re.captures(lower)?;
    let n: i64 = match caps.get(1)?.as_str() {
        "a" | "an" | "one" => 1,
        digits => digits.parse().ok()?,
    };
    // Out-of-range counts are unparseable, not fatal.
    let delta = match caps.get(2)?.as_str() {
        "minute" | "min" => Duration::try_minutes(n)?,
        "hour" | "hr" => Duration::try_hours(n)?,
        "day" => Duration::try_days(n)?,
        "week" => Duration::try_weeks(n)?,
        "month" => Duration::try_days(n.checked_mul(30)?)?,
        "year" => Duration::try_days(n.checked_mul(365)?)?,
        _ => return None,
    };
    now.checked_sub_signed(delta)
}
