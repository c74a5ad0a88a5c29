//! Workday list parsing.
//!
//! Workday sets feed [`DateFilter`](glucose_core::calculations::DateFilter)
//! so metrics can be split into work and non-work days. Two inputs are
//! understood: JSON date lists and plain text copied from a time-sheet PDF.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use glucose_core::error::{GlucoseError, Result};
use glucose_core::time_utils::parse_date;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Lines carrying any of these markers are days off, even with clock times.
const DAY_OFF_MARKERS: [&str; 3] = ["Vakantie", "OA Var", "Vrije Dag"];

// ── Public API ────────────────────────────────────────────────────────────────

/// Parse a workday list, JSON first and time-sheet text second.
///
/// Time-sheet lines only carry `DD/MM`; the year comes from a `DD/MM/YYYY`
/// date anywhere in the text or from `Week NN YYYY` lines. Lines seen before
/// any year is known are ignored.
pub fn parse_workdays(input: &str) -> Result<BTreeSet<NaiveDate>> {
    parse_workdays_with_year(input, None)
}

/// Like [`parse_workdays`], with a year to assume for time-sheet lines that
/// precede any year marker.
pub fn parse_workdays_with_year(
    input: &str,
    fallback_year: Option<i32>,
) -> Result<BTreeSet<NaiveDate>> {
    if let Ok(value) = serde_json::from_str::<Value>(input) {
        let dates = dates_from_json(&value);
        if !dates.is_empty() {
            debug!("Parsed {} workdays from JSON", dates.len());
            return Ok(dates);
        }
    }

    let dates = dates_from_timesheet(input, fallback_year)?;
    if dates.is_empty() {
        return Err(GlucoseError::Workdays(
            "expected time-sheet text or a JSON date list with at least one workday".to_string(),
        ));
    }
    debug!("Parsed {} workdays from time-sheet text", dates.len());
    Ok(dates)
}

#[derive(Debug, Serialize)]
struct WorkdayExport {
    source: &'static str,
    format: &'static str,
    count: usize,
    workdays: Vec<String>,
}

/// Serialise a workday set to the JSON form [`parse_workdays`] reads back.
pub fn export_workdays_json(workdays: &BTreeSet<NaiveDate>) -> Result<String> {
    let export = WorkdayExport {
        source: "ProTime",
        format: "YYYY/MM/DD",
        count: workdays.len(),
        workdays: workdays
            .iter()
            .map(|d| d.format("%Y/%m/%d").to_string())
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&export)?)
}

// ── JSON ──────────────────────────────────────────────────────────────────────

fn dates_from_json(value: &Value) -> BTreeSet<NaiveDate> {
    match value {
        Value::Array(items) => items.iter().filter_map(date_from_value).collect(),
        Value::Object(map) => match map.get("workdays") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(entry) => {
                        if entry.get("is_workday").is_some_and(is_truthy) {
                            entry.get("date").and_then(date_from_value)
                        } else {
                            None
                        }
                    }
                    other => date_from_value(other),
                })
                .collect(),
            _ => map
                .iter()
                .filter(|(_, flag)| **flag == Value::Bool(true))
                .filter_map(|(key, _)| parse_date(key))
                .collect(),
        },
        _ => BTreeSet::new(),
    }
}

fn date_from_value(value: &Value) -> Option<NaiveDate> {
    value.as_str().and_then(parse_date)
}

/// `is_workday` may be a bool or a clock string such as `"22:00"`.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => !s.trim().is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    }
}

// ── Time-sheet text ───────────────────────────────────────────────────────────

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| GlucoseError::Workdays(e.to_string()))
}

fn dates_from_timesheet(input: &str, fallback_year: Option<i32>) -> Result<BTreeSet<NaiveDate>> {
    let header_date = compile(r"\b\d{1,2}/\d{1,2}/(20\d{2})\b")?;
    let week_line = compile(r"Week\s+\d+\s+(20\d{2})")?;
    let day_line = compile(r"\b(ma|di|wo|do|vr|za|zo)\s+(\d{1,2})/(\d{1,2})")?;
    let clock_time = compile(r"\d{1,2}:\d{2}")?;

    let mut year: Option<i32> = header_date
        .captures(input)
        .and_then(|c| c[1].parse().ok())
        .or(fallback_year);

    let mut dates = BTreeSet::new();
    for line in input.lines() {
        if let Some(c) = week_line.captures(line) {
            year = c[1].parse().ok().or(year);
            continue;
        }
        let Some(c) = day_line.captures(line) else {
            continue;
        };
        if !clock_time.is_match(line) || DAY_OFF_MARKERS.iter().any(|m| line.contains(m)) {
            continue;
        }
        let (Some(y), Ok(day), Ok(month)) = (year, c[2].parse::<u32>(), c[3].parse::<u32>()) else {
            continue;
        };
        if let Some(date) = NaiveDate::from_ymd_opt(y, month, day) {
            dates.insert(date);
        }
    }
    Ok(dates)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
