//! Daily bolus insulin and carbohydrate totals.
//!
//! Only the delivered bolus volume is in the parsed columns, so these are
//! bolus totals; automatic basal delivery is not included.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use glucose_core::calculations::mean;
use glucose_core::models::{InsulinDay, InsulinSummary, Reading};
use glucose_core::time_utils::DateWindow;
use tracing::debug;

/// Totals for every date in `window` that has any row, oldest first.
///
/// Days with glucose but no bolus report zero.
pub fn daily_insulin(readings: &[Reading], window: DateWindow) -> Vec<InsulinDay> {
    let mut days: BTreeMap<NaiveDate, InsulinDay> = BTreeMap::new();
    for reading in readings.iter().filter(|r| window.contains(r.timestamp)) {
        let date = reading.date();
        days.entry(date)
            .or_insert_with(|| InsulinDay::new(date))
            .add_reading(reading);
    }
    days.into_values().collect()
}

/// Totals for one calendar day.
pub fn day_insulin(readings: &[Reading], date: NaiveDate) -> InsulinDay {
    let mut day = InsulinDay::new(date);
    readings
        .iter()
        .filter(|r| r.date() == date)
        .for_each(|r| day.add_reading(r));
    day
}

/// Mean, spread and range of the daily bolus totals.
///
/// Only days with at least one bolus count; `None` when there are none.
pub fn insulin_summary(days: &[InsulinDay]) -> Option<InsulinSummary> {
    let dosed: Vec<&InsulinDay> = days.iter().filter(|d| d.has_insulin()).collect();
    if dosed.is_empty() {
        return None;
    }
    let totals: Vec<f64> = dosed.iter().map(|d| d.bolus_units).collect();
    let carbs: Vec<f64> = dosed.iter().map(|d| d.carbs_g).collect();

    let mean_daily_bolus = mean(&totals);
    let variance =
        totals.iter().map(|t| (t - mean_daily_bolus).powi(2)).sum::<f64>() / totals.len() as f64;
    let sd_daily_bolus = variance.sqrt();

    let summary = InsulinSummary {
        days: dosed.len(),
        mean_daily_bolus,
        sd_daily_bolus,
        cv_daily_bolus: 100.0 * sd_daily_bolus / mean_daily_bolus,
        min_daily_bolus: totals.iter().copied().fold(f64::INFINITY, f64::min),
        max_daily_bolus: totals.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean_daily_carbs: mean(&carbs),
    };
    debug!(
        days = summary.days,
        mean = summary.mean_daily_bolus,
        "insulin summary calculated"
    );
    Some(summary)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    fn at(d: u32, h: u32) -> NaiveDateTime {
        date(d).and_hms_opt(h, 0, 0).unwrap()
    }

    fn make_bolus(d: u32, h: u32, units: f64, carbs: f64) -> Reading {
        let mut r = Reading::event(at(d, h));
        r.bolus_units = units;
        r.carbs_g = carbs;
        r
    }

    fn week() -> DateWindow {
        DateWindow::new(date(1), date(7))
    }

    #[test]
    fn test_daily_totals() {
        let readings = vec![
            make_bolus(1, 8, 4.0, 45.0),
            make_bolus(1, 13, 6.0, 60.0),
            Reading::glucose(at(2, 9), 120.0),
            make_bolus(3, 8, 5.0, 0.0),
            make_bolus(9, 8, 50.0, 0.0),
        ];
        let days = daily_insulin(&readings, week());
        assert_eq!(days.len(), 3);
        assert_eq!(days[0].date, date(1));
        assert_eq!(days[0].bolus_units, 10.0);
        assert_eq!(days[0].bolus_count, 2);
        assert_eq!(days[0].carbs_g, 105.0);
        assert_eq!(days[1].bolus_units, 0.0);
        assert!(!days[1].has_insulin());
        assert_eq!(days[2].carb_entries, 0);
    }

    #[test]
    fn test_day_insulin() {
        let readings = vec![make_bolus(1, 8, 4.0, 30.0), make_bolus(2, 8, 3.0, 0.0)];
        let day = day_insulin(&readings, date(1));
        assert_eq!(day.bolus_units, 4.0);
        assert_eq!(day.carbs_g, 30.0);
        assert_eq!(day_insulin(&readings, date(5)), InsulinDay::new(date(5)));
    }

    #[test]
    fn test_summary_statistics() {
        // Daily totals 30, 40, 50 → mean 40, population SD √(200/3).
        let readings = vec![
            make_bolus(1, 8, 30.0, 150.0),
            make_bolus(2, 8, 40.0, 200.0),
            make_bolus(3, 8, 20.0, 100.0),
            make_bolus(3, 18, 30.0, 150.0),
            Reading::glucose(at(4, 8), 110.0),
        ];
        let summary = insulin_summary(&daily_insulin(&readings, week())).unwrap();
        assert_eq!(summary.days, 3);
        assert!((summary.mean_daily_bolus - 40.0).abs() < 1e-9);
        let sd = (200.0f64 / 3.0).sqrt();
        assert!((summary.sd_daily_bolus - sd).abs() < 1e-9);
        assert!((summary.cv_daily_bolus - 100.0 * sd / 40.0).abs() < 1e-9);
        assert_eq!(summary.min_daily_bolus, 30.0);
        assert_eq!(summary.max_daily_bolus, 50.0);
        assert!((summary.mean_daily_carbs - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_without_boluses() {
        let readings = vec![Reading::glucose(at(1, 8), 110.0)];
        assert!(insulin_summary(&daily_insulin(&readings, week())).is_none());
        assert!(insulin_summary(&[]).is_none());
    }
}
