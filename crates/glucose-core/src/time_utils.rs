//! Wall-clock date and time helpers.
//!
//! CGM exports record local wall-clock time without an offset. Timestamps are
//! kept as [`NaiveDateTime`] and never pass through a timezone database: a
//! local time repeated or skipped by a DST switch is preserved exactly as the
//! device wrote it, so day boundaries and time-of-day bins always match the
//! clock the patient saw.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::config::TimeSplit;

// ── Parsing ───────────────────────────────────────────────────────────────────

const DATE_FORMATS: &[&str] = &["%Y/%m/%d", "%Y-%m-%d"];
const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M"];

/// Parse a `YYYY/MM/DD` (or `YYYY-MM-DD`) date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Parse a `HH:MM:SS` time; `HH:MM` is accepted with zero seconds.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
}

/// Combine separate date and time cells into one wall-clock timestamp.
pub fn parse_local_datetime(date: &str, time: &str) -> Option<NaiveDateTime> {
    Some(parse_date(date)?.and_time(parse_time(time)?))
}

// ── Time-of-day binning ───────────────────────────────────────────────────────

/// Minutes since local midnight (0..1440).
pub fn minute_of_day(ts: NaiveDateTime) -> u32 {
    ts.hour() * 60 + ts.minute()
}

/// Time-of-day bin for `ts` given a bin width in minutes.
pub fn bin_index(ts: NaiveDateTime, bin_minutes: u32) -> usize {
    (minute_of_day(ts) / bin_minutes.max(1)) as usize
}

/// `HH:MM` label of the start of bin `index`.
pub fn bin_label(index: usize, bin_minutes: u32) -> String {
    let start = index as u32 * bin_minutes;
    format!("{:02}:{:02}", start / 60, start % 60)
}

/// Signed difference `to - from` in (fractional) minutes.
pub fn minutes_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_seconds() as f64 / 60.0
}

/// English weekday name for display.
pub fn weekday_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        chrono::Weekday::Mon => "Monday",
        chrono::Weekday::Tue => "Tuesday",
        chrono::Weekday::Wed => "Wednesday",
        chrono::Weekday::Thu => "Thursday",
        chrono::Weekday::Fri => "Friday",
        chrono::Weekday::Sat => "Saturday",
        chrono::Weekday::Sun => "Sunday",
    }
}

// ── DateWindow ────────────────────────────────────────────────────────────────

/// Inclusive calendar-date window: `start 00:00:00 ..= end 23:59:59`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Window covering exactly one calendar day.
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Whether `ts` falls on a date inside the window. Comparing dates keeps
    /// sub-second timestamps just before midnight inside the window.
    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        let date = ts.date();
        date >= self.start && date <= self.end
    }

    /// Number of calendar days spanned (0 when `end < start`).
    pub fn days(&self) -> i64 {
        ((self.end - self.start).num_days() + 1).max(0)
    }
}

// ── TimeFilter ────────────────────────────────────────────────────────────────

/// Restricts readings to an hour-of-day window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFilter {
    /// The configured night hours (default `[0, 6)`).
    Night,
    /// The configured day hours (default `[6, 24)`).
    Day,
    /// An explicit `[start, end)` hour window; wraps past midnight when
    /// `start > end` (e.g. `22..6`).
    Hours { start: u32, end: u32 },
}

impl TimeFilter {
    /// Whether a reading at `ts` passes the filter.
    pub fn matches(&self, ts: NaiveDateTime, split: &TimeSplit) -> bool {
        let hour = ts.hour();
        let (start, end) = match *self {
            TimeFilter::Night => (split.night_start, split.night_end),
            TimeFilter::Day => (split.day_start, split.day_end),
            TimeFilter::Hours { start, end } => (start, end),
        };
        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
