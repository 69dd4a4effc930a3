//! Journal date resolution from a subject line.
//!
//! Subjects look like "It's Sunday, Sept 2. How was your day?" and carry
//! no reliable year, so the parsed date competes with the same date one
//! year earlier and the one nearest to "now" wins.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone};
use regex::Regex;

/// Parsed dates further than this into the future are treated as misparses.
const FUTURE_TOLERANCE_DAYS: i64 = 7;

/// Hour assigned to a parsed calendar day (the middle of the day).
const PARSED_HOUR: u32 = 12;

const MONTH: &str = r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sept?(?:ember)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").unwrap());

static MONTH_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b{MONTH}\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b(?:,?\s+(\d{{4}})\b)?"
    ))
    .unwrap()
});

static DAY_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?{MONTH}\b\.?(?:,?\s+(\d{{4}})\b)?"
    ))
    .unwrap()
});

static NUMERIC_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/(\d{2}|\d{4}))?\b").unwrap());

static RELATIVE_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(today|yesterday)\b").unwrap());

/// Resolve the calendar day an email should be filed under.
///
/// `now` must be in the user's timezone. Falls back to `now`'s date when
/// nothing usable is found.
pub fn resolve_entry_date<Tz: TimeZone>(subject: &str, now: &DateTime<Tz>) -> NaiveDate {
    let parsed = parse_subject_date(subject, now).unwrap_or_else(|| now.clone());
    let cutoff = now.clone() + Duration::days(FUTURE_TOLERANCE_DAYS);
    let year_earlier = parsed.clone().checked_sub_months(Months::new(12));

    [Some(parsed), year_earlier]
        .into_iter()
        .flatten()
        .filter(|candidate| *candidate < cutoff)
        .min_by_key(|candidate| (candidate.clone() - now.clone()).num_seconds().abs())
        .map(|date| date.date_naive())
        .unwrap_or_else(|| now.date_naive())
}

/// Best-effort extraction of a date from free-form subject text.
///
/// The year defaults to `now`'s year. Returns midday of the parsed day in
/// `now`'s timezone.
pub fn parse_subject_date<Tz: TimeZone>(subject: &str, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let date = find_calendar_date(subject, now.year())
        .or_else(|| find_relative_day(subject, now.date_naive()))?;
    let local = date.and_hms_opt(PARSED_HOUR, 0, 0)?;
    now.timezone().from_local_datetime(&local).earliest()
}

/// First valid date in pattern priority order. A pattern whose match is
/// not a real calendar day yields to the next one.
fn find_calendar_date(subject: &str, default_year: i32) -> Option<NaiveDate> {
    iso_date(subject)
        .or_else(|| month_day(subject, default_year))
        .or_else(|| day_month(subject, default_year))
        .or_else(|| numeric_date(subject, default_year))
}

fn iso_date(subject: &str) -> Option<NaiveDate> {
    let caps = ISO_DATE.captures(subject)?;
    NaiveDate::from_ymd_opt(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    )
}

fn month_day(subject: &str, default_year: i32) -> Option<NaiveDate> {
    let caps = MONTH_DAY.captures(subject)?;
    let year = caps.get(3).and_then(|y| y.as_str().parse().ok());
    NaiveDate::from_ymd_opt(
        year.unwrap_or(default_year),
        month_number(&caps[1])?,
        caps[2].parse().ok()?,
    )
}

fn day_month(subject: &str, default_year: i32) -> Option<NaiveDate> {
    let caps = DAY_MONTH.captures(subject)?;
    let year = caps.get(3).and_then(|y| y.as_str().parse().ok());
    NaiveDate::from_ymd_opt(
        year.unwrap_or(default_year),
        month_number(&caps[2])?,
        caps[1].parse().ok()?,
    )
}

fn numeric_date(subject: &str, default_year: i32) -> Option<NaiveDate> {
    let caps = NUMERIC_DATE.captures(subject)?;
    let year = match caps.get(3) {
        Some(y) if y.as_str().len() == 2 => 2000 + y.as_str().parse::<i32>().ok()?,
        Some(y) => y.as_str().parse().ok()?,
        None => default_year,
    };
    NaiveDate::from_ymd_opt(year, caps[1].parse().ok()?, caps[2].parse().ok()?)
}

fn find_relative_day(subject: &str, today: NaiveDate) -> Option<NaiveDate> {
    let caps = RELATIVE_DAY.captures(subject)?;
    if caps[1].eq_ignore_ascii_case("yesterday") {
        today.pred_opt()
    } else {
        Some(today)
    }
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.get(..3)?.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}
