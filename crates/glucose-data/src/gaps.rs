//! Data-gap analysis over glucose readings.
//!
//! CGM sensors report every 5 minutes; long silences point at warm-up,
//! signal loss or a sensor change.

use chrono::{Duration, NaiveDateTime};
use glucose_core::formatting::percentage;
use glucose_core::models::Reading;
use glucose_core::time_utils::minutes_between;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Expected minutes between consecutive sensor readings.
pub const READING_INTERVAL_MINUTES: i64 = 5;

/// Gaps shorter than this are normal transmitter hiccups.
pub const DEFAULT_MIN_GAP_MINUTES: i64 = 120;

// ── GapClass ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapClass {
    /// Under 2 hours.
    Short,
    /// 2 to 4 hours: warm-up or signal loss.
    Moderate,
    /// 4 to 8 hours: possible sensor change.
    Long,
    /// 8 hours or more: sensor likely removed.
    VeryLong,
}

impl GapClass {
    pub fn from_minutes(minutes: f64) -> Self {
        if minutes >= 480.0 {
            GapClass::VeryLong
        } else if minutes >= 240.0 {
            GapClass::Long
        } else if minutes >= 120.0 {
            GapClass::Moderate
        } else {
            GapClass::Short
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            GapClass::Short => "Short gap",
            GapClass::Moderate => "Moderate gap (2-4 hours), sensor warm-up or signal loss",
            GapClass::Long => "Long gap (4-8 hours), possible sensor change",
            GapClass::VeryLong => "Very long gap (8+ hours), likely sensor removal",
        }
    }
}

/// Silence between two consecutive glucose readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseGap {
    /// Last reading before the gap.
    pub start: NaiveDateTime,
    /// First reading after the gap.
    pub end: NaiveDateTime,
    pub duration_minutes: i64,
    pub class: GapClass,
}

// ── Detection ─────────────────────────────────────────────────────────────────

fn glucose_times(readings: &[Reading]) -> Vec<NaiveDateTime> {
    let mut times: Vec<NaiveDateTime> = readings
        .iter()
        .filter(|r| r.glucose_mg_dl.is_some())
        .map(|r| r.timestamp)
        .collect();
    times.sort();
    times
}

/// All gaps of at least `min_gap_minutes` between consecutive glucose
/// readings. Event-only rows do not break a gap.
pub fn detect_glucose_gaps(readings: &[Reading], min_gap_minutes: i64) -> Vec<GlucoseGap> {
    let times = glucose_times(readings);
    let gaps: Vec<GlucoseGap> = times
        .windows(2)
        .filter_map(|w| {
            let minutes = minutes_between(w[0], w[1]);
            (minutes >= min_gap_minutes as f64).then(|| GlucoseGap {
                start: w[0],
                end: w[1],
                duration_minutes: minutes.round() as i64,
                class: GapClass::from_minutes(minutes),
            })
        })
        .collect();
    debug!(
        "Detected {} gaps totalling {} minutes",
        gaps.len(),
        gaps.iter().map(|g| g.duration_minutes).sum::<i64>()
    );
    gaps
}

/// Gaps starting within `window_hours` of `target`, either side.
pub fn find_gaps_near(gaps: &[GlucoseGap], target: NaiveDateTime, window_hours: i64) -> Vec<GlucoseGap> {
    let window = Duration::hours(window_hours).num_seconds();
    gaps.iter()
        .filter(|g| (g.start - target).num_seconds().abs() <= window)
        .cloned()
        .collect()
}

/// When a sensor worn from `start` until `end` stopped reporting: the last
/// reading before the first gap of at least `min_gap_minutes` that begins
/// inside `[start, end)`. The gap itself may run past `end`. An open `end`
/// covers the newest sensor; a silence with no later reading is not a gap.
pub fn find_end_of_life_gap_start(
    readings: &[Reading],
    start: NaiveDateTime,
    end: Option<NaiveDateTime>,
    min_gap_minutes: i64,
) -> Option<NaiveDateTime> {
    let times: Vec<NaiveDateTime> = glucose_times(readings)
        .into_iter()
        .filter(|t| *t >= start)
        .collect();
    times
        .windows(2)
        .take_while(|w| end.map_or(true, |end| w[0] < end))
        .find(|w| minutes_between(w[0], w[1]) >= min_gap_minutes as f64)
        .map(|w| w[0])
}

// ── Continuity ────────────────────────────────────────────────────────────────

/// Reading coverage of a period against the 5-minute cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Continuity {
    pub coverage_percent: f64,
    pub missing_readings: usize,
    pub expected_readings: usize,
    pub actual_readings: usize,
}

/// Coverage of `[from, to]` by glucose readings, capped at 100 %.
///
/// A period shorter than one interval expects no readings and reports 0 %.
pub fn calculate_continuity(readings: &[Reading], from: NaiveDateTime, to: NaiveDateTime) -> Continuity {
    let period = minutes_between(from, to).max(0.0);
    let expected = (period / READING_INTERVAL_MINUTES as f64).floor() as usize;
    let actual = readings
        .iter()
        .filter(|r| r.glucose_mg_dl.is_some() && r.timestamp >= from && r.timestamp <= to)
        .count();
    Continuity {
        coverage_percent: percentage(actual, expected).min(100.0),
        missing_readings: expected.saturating_sub(actual),
        expected_readings: expected,
        actual_readings: actual,
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn make_reading(h: u32, m: u32) -> Reading {
        Reading::glucose(at(h, m), 120.0)
    }

    #[test]
    fn test_gap_classes() {
        assert_eq!(GapClass::from_minutes(119.0), GapClass::Short);
        assert_eq!(GapClass::from_minutes(120.0), GapClass::Moderate);
        assert_eq!(GapClass::from_minutes(239.9), GapClass::Moderate);
        assert_eq!(GapClass::from_minutes(240.0), GapClass::Long);
        assert_eq!(GapClass::from_minutes(480.0), GapClass::VeryLong);
    }

    #[test]
    fn test_detect_gaps_threshold_inclusive() {
        let readings = vec![
            make_reading(0, 0),
            make_reading(2, 0),
            make_reading(2, 5),
            make_reading(7, 0),
            make_reading(7, 5),
        ];
        let gaps = detect_glucose_gaps(&readings, DEFAULT_MIN_GAP_MINUTES);
        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0].duration_minutes, 120);
        assert_eq!(gaps[0].class, GapClass::Moderate);
        assert_eq!(gaps[1].start, at(2, 5));
        assert_eq!(gaps[1].duration_minutes, 295);
        assert_eq!(gaps[1].class, GapClass::Long);
    }

    #[test]
    fn test_event_rows_do_not_split_gaps() {
        let readings = vec![
            make_reading(0, 0),
            Reading::event(at(1, 0)).with_alert("SENSOR CONNECTED"),
            make_reading(3, 0),
        ];
        let gaps = detect_glucose_gaps(&readings, DEFAULT_MIN_GAP_MINUTES);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].duration_minutes, 180);
    }

    #[test]
    fn test_no_gaps_for_short_input() {
        assert!(detect_glucose_gaps(&[make_reading(0, 0)], 120).is_empty());
        assert!(detect_glucose_gaps(&[], 120).is_empty());
    }

    #[test]
    fn test_find_gaps_near() {
        let readings = vec![make_reading(0, 0), make_reading(3, 0), make_reading(20, 0)];
        let gaps = detect_glucose_gaps(&readings, 120);
        let near = find_gaps_near(&gaps, at(5, 0), 6);
        assert_eq!(near.len(), 2);
        let near = find_gaps_near(&gaps, at(8, 0), 6);
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].start, at(3, 0));
    }

    #[test]
    fn test_end_of_life_gap_start() {
        let readings = vec![make_reading(0, 0), make_reading(0, 5), make_reading(4, 0)];
        assert_eq!(
            find_end_of_life_gap_start(&readings, at(0, 0), Some(at(23, 0)), 120),
            Some(at(0, 5))
        );
        // The gap may end after the window as long as it starts inside it.
        assert_eq!(
            find_end_of_life_gap_start(&readings, at(0, 0), Some(at(1, 0)), 120),
            Some(at(0, 5))
        );
        assert_eq!(find_end_of_life_gap_start(&readings, at(0, 0), Some(at(0, 5)), 120), None);
        assert_eq!(find_end_of_life_gap_start(&readings, at(0, 0), None, 120), Some(at(0, 5)));
        assert_eq!(find_end_of_life_gap_start(&readings, at(0, 10), None, 120), None);
    }

    #[test]
    fn test_continuity() {
        // One hour expects 12 readings; 6 present.
        let readings: Vec<Reading> = (0..6).map(|i| make_reading(8, i * 5)).collect();
        let c = calculate_continuity(&readings, at(8, 0), at(9, 0));
        assert_eq!(c.expected_readings, 12);
        assert_eq!(c.actual_readings, 6);
        assert_eq!(c.missing_readings, 6);
        assert!((c.coverage_percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_continuity_degenerate_period() {
        let c = calculate_continuity(&[make_reading(8, 0)], at(8, 0), at(8, 0));
        assert_eq!(c.expected_readings, 0);
        assert_eq!(c.coverage_percent, 0.0);
        assert_eq!(c.missing_readings, 0);
    }
}
