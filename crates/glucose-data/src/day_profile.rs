//! Single-day profiles: curve, metrics, episodes, device markers and
//! badges for one calendar day.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use glucose_core::calculations::{calculate_metrics, MetricsOptions};
use glucose_core::config::{BadgeThresholds, EngineConfig};
use glucose_core::models::{
    Badge, BadgeKind, DayMarker, DayProfile, EpisodeSet, MetricsResult, Reading,
    SensorChangeEvent,
};
use glucose_core::time_utils::{weekday_name, DateWindow};
use tracing::debug;

use crate::aggregator::day_curve;
use crate::analyzer::detect_events;
use crate::clustering::{
    deduplicate_sensor_events, detect_cartridge_changes, infer_gap_changes,
    raw_alerts_from_readings,
};
use crate::insulin::day_insulin;

// ── Badges ────────────────────────────────────────────────────────────────────

fn badge(kind: BadgeKind, description: &str) -> Badge {
    Badge {
        kind,
        name: kind.display_name().to_string(),
        description: description.to_string(),
    }
}

/// Award the day badges. Badges are independent; a day may earn several.
pub fn detect_badges(
    metrics: Option<&MetricsResult>,
    episodes: &EpisodeSet,
    thresholds: &BadgeThresholds,
) -> Vec<Badge> {
    let Some(m) = metrics else {
        return Vec::new();
    };
    let no_hypos = episodes.hypo_count() == 0;
    let mut badges = Vec::new();

    if m.tir >= thresholds.perfect_tir {
        badges.push(badge(
            BadgeKind::PerfectDay,
            &format!("TIR of at least {}%", thresholds.perfect_tir),
        ));
    }
    if m.tir >= thresholds.stable_tir && m.cv < thresholds.zen_cv && no_hypos {
        badges.push(badge(
            BadgeKind::ZenMaster,
            &format!(
                "TIR of at least {}%, CV below {}% and no hypos",
                thresholds.stable_tir, thresholds.zen_cv
            ),
        ));
    }
    if m.tir >= thresholds.stable_tir && m.cv < thresholds.steady_cv && no_hypos {
        badges.push(badge(
            BadgeKind::SteadyDay,
            &format!(
                "TIR of at least {}%, CV below {}% and no hypos",
                thresholds.stable_tir, thresholds.steady_cv
            ),
        ));
    }
    badges
}

// ── Sensor markers ────────────────────────────────────────────────────────────

/// Sensor markers for `date`. Supplied events win; otherwise the day's own
/// alerts are clustered, and only without alerts are in-day gaps used.
fn sensor_markers(
    day_rows: &[Reading],
    date: NaiveDate,
    sensor_events: Option<&[SensorChangeEvent]>,
    config: &EngineConfig,
) -> Vec<DayMarker> {
    let events: Vec<SensorChangeEvent> = match sensor_events {
        Some(events) => events
            .iter()
            .filter(|e| e.timestamp.date() == date)
            .cloned()
            .collect(),
        None => {
            let alerts = raw_alerts_from_readings(day_rows);
            let clusters = deduplicate_sensor_events(&alerts, config);
            let mut from_alerts: Vec<SensorChangeEvent> = clusters.confirmed;
            from_alerts.extend(
                clusters
                    .ambiguous_groups
                    .into_iter()
                    .flat_map(|g| g.candidates),
            );
            if from_alerts.is_empty() {
                infer_gap_changes(day_rows, &alerts, config)
            } else {
                from_alerts
            }
        }
    };

    let mut markers: Vec<DayMarker> = events
        .iter()
        .map(DayMarker::from_sensor_event)
        // A change stamped at midnight is a day-boundary artefact.
        .filter(|m| m.minute_of_day != 0)
        .collect();
    markers.sort_by_key(|m| m.timestamp);
    markers
}

// ── Profiles ──────────────────────────────────────────────────────────────────

/// Build the profile of one calendar day.
///
/// `sensor_events`, when given, are typically the whole-set output of
/// [`detect_sensor_changes`](crate::clustering::detect_sensor_changes); only
/// those on `date` are used. A day without readings yields a profile with
/// no metrics, an empty curve and no badges.
pub fn build_day_profile(
    readings: &[Reading],
    date: NaiveDate,
    sensor_events: Option<&[SensorChangeEvent]>,
    config: &EngineConfig,
) -> DayProfile {
    let window = DateWindow::single(date);
    let day_rows: Vec<Reading> = readings
        .iter()
        .filter(|r| window.contains(r.timestamp))
        .cloned()
        .collect();

    let metrics = calculate_metrics(&day_rows, window, &MetricsOptions::default(), config);
    let episodes = detect_events(&day_rows, window, config);
    let badges = detect_badges(metrics.as_ref(), &episodes, &config.badges);

    DayProfile {
        date,
        weekday: weekday_name(date).to_string(),
        curve: day_curve(&day_rows, date, config),
        sensor_changes: sensor_markers(&day_rows, date, sensor_events, config),
        cartridge_changes: detect_cartridge_changes(&day_rows),
        insulin: day_insulin(&day_rows, date),
        metrics,
        episodes,
        badges,
        reading_count: day_rows.len(),
    }
}

/// Profiles for the newest `n` dates that have any row, newest first.
pub fn recent_day_profiles(
    readings: &[Reading],
    n: usize,
    sensor_events: Option<&[SensorChangeEvent]>,
    config: &EngineConfig,
) -> Vec<DayProfile> {
    let dates: BTreeSet<NaiveDate> = readings.iter().map(|r| r.date()).collect();
    let profiles: Vec<DayProfile> = dates
        .into_iter()
        .rev()
        .take(n)
        .map(|date| build_day_profile(readings, date, sensor_events, config))
        .collect();
    debug!("Built {} day profiles", profiles.len());
    profiles
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDateTime};
    use glucose_core::models::{Confidence, EventSource};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        date(d).and_hms_opt(h, m, 0).unwrap()
    }

    /// A full day of readings every 5 minutes.
    fn make_day(d: u32, value: impl Fn(usize) -> f64) -> Vec<Reading> {
        (0..288)
            .map(|i| Reading::glucose(at(d, 0, 0) + Duration::minutes(5 * i as i64), value(i)))
            .collect()
    }

    fn profile(readings: &[Reading], d: u32) -> DayProfile {
        build_day_profile(readings, date(d), None, &EngineConfig::default())
    }

    fn kinds(p: &DayProfile) -> Vec<BadgeKind> {
        p.badges.iter().map(|b| b.kind).collect()
    }

    // ── Badges ───────────────────────────────────────────────────────────────

    #[test]
    fn test_flat_in_range_day_earns_all_badges() {
        let p = profile(&make_day(1, |_| 120.0), 1);
        assert_eq!(
            kinds(&p),
            vec![BadgeKind::PerfectDay, BadgeKind::ZenMaster, BadgeKind::SteadyDay]
        );
        assert_eq!(p.badges[0].name, "Perfect Day");
    }

    #[test]
    fn test_hypo_blocks_stability_badges() {
        // Four readings below 70 (20 minutes) then back in range.
        let p = profile(
            &make_day(1, |i| if (100..104).contains(&i) { 65.0 } else { 120.0 }),
            1,
        );
        assert_eq!(p.episodes.hypo_count(), 1);
        let k = kinds(&p);
        assert!(!k.contains(&BadgeKind::ZenMaster));
        assert!(!k.contains(&BadgeKind::SteadyDay));
        // TIR 284/288 = 98.6 %, below the perfect-day bar.
        assert!(!k.contains(&BadgeKind::PerfectDay));
    }

    #[test]
    fn test_highly_variable_day_gets_no_stability_badge() {
        // Alternating 80/172: CV ≈ 36.6 %, too variable for either badge.
        let wide = profile(&make_day(1, |i| if i % 2 == 0 { 80.0 } else { 172.0 }), 1);
        assert_eq!(kinds(&wide), vec![BadgeKind::PerfectDay]);
    }

    #[test]
    fn test_moderately_variable_day_gets_steady_but_not_zen() {
        // Alternating 85/160: CV ≈ 30.7 %.
        let medium = profile(&make_day(1, |i| if i % 2 == 0 { 85.0 } else { 160.0 }), 1);
        let m = medium.metrics.as_ref().unwrap();
        assert!(m.cv >= 30.0 && m.cv < 36.0, "cv = {}", m.cv);
        assert_eq!(
            kinds(&medium),
            vec![BadgeKind::PerfectDay, BadgeKind::SteadyDay]
        );
    }

    #[test]
    fn test_badges_need_metrics() {
        assert!(detect_badges(None, &EpisodeSet::default(), &BadgeThresholds::default()).is_empty());
    }

    // ── Profile contents ─────────────────────────────────────────────────────

    #[test]
    fn test_empty_day_profile() {
        let p = profile(&make_day(1, |_| 120.0), 2);
        assert!(p.metrics.is_none());
        assert_eq!(p.curve.len(), 288);
        assert!(p.curve.iter().all(|c| c.glucose.is_none()));
        assert!(p.badges.is_empty());
        assert_eq!(p.reading_count, 0);
        assert_eq!(p.weekday, "Thursday");
    }

    #[test]
    fn test_profile_uses_only_its_day() {
        let mut readings = make_day(1, |_| 100.0);
        readings.extend(make_day(2, |_| 200.0));
        let p = profile(&readings, 2);
        let m = p.metrics.unwrap();
        assert_eq!(m.mean, 200.0);
        assert_eq!(m.reading_count, 288);
        assert_eq!(p.reading_count, 288);
        assert_eq!(p.curve[0].glucose, Some(200.0));
    }

    #[test]
    fn test_markers_from_day_alerts() {
        let mut readings = make_day(1, |_| 120.0);
        readings.push(Reading::event(at(1, 9, 0)).with_alert("CHANGE SENSOR"));
        readings.push(Reading::event(at(1, 9, 40)).with_alert("SENSOR CONNECTED"));
        readings.push(Reading::event(at(1, 19, 30)).with_rewind());
        readings.sort_by_key(|r| r.timestamp);

        let p = profile(&readings, 1);
        assert_eq!(p.sensor_changes.len(), 1);
        assert_eq!(p.sensor_changes[0].minute_of_day, 540);
        assert_eq!(p.sensor_changes[0].confidence, Confidence::Confirmed);
        assert_eq!(p.cartridge_changes.len(), 1);
        assert_eq!(p.cartridge_changes[0].minute_of_day, 19 * 60 + 30);
        // Event rows count toward the day's rows but not its metrics.
        assert_eq!(p.reading_count, 291);
        assert_eq!(p.metrics.unwrap().reading_count, 288);
    }

    #[test]
    fn test_profile_totals_day_insulin() {
        let mut readings = make_day(1, |_| 120.0);
        let mut breakfast = Reading::event(at(1, 7, 30));
        breakfast.bolus_units = 4.5;
        breakfast.carbs_g = 40.0;
        let mut late = Reading::event(at(2, 0, 30));
        late.bolus_units = 2.0;
        readings.extend([breakfast, late]);
        readings.sort_by_key(|r| r.timestamp);

        let p = profile(&readings, 1);
        assert_eq!(p.insulin.date, date(1));
        assert_eq!(p.insulin.bolus_units, 4.5);
        assert_eq!(p.insulin.bolus_count, 1);
        assert_eq!(p.insulin.carbs_g, 40.0);
        assert!(!profile(&readings, 3).insulin.has_insulin());
    }

    #[test]
    fn test_markers_fall_back_to_gaps() {
        // Drop 10:00..13:10, leaving a 200-minute hole after 09:55.
        let readings: Vec<Reading> = make_day(1, |_| 120.0)
            .into_iter()
            .filter(|r| r.timestamp < at(1, 10, 0) || r.timestamp >= at(1, 13, 15))
            .collect();
        let p = profile(&readings, 1);
        assert_eq!(p.sensor_changes.len(), 1);
        let marker = &p.sensor_changes[0];
        assert_eq!(marker.source, EventSource::Gap);
        assert_eq!(marker.timestamp, at(1, 9, 55));
        assert_eq!(marker.gap_minutes, Some(200));
    }

    #[test]
    fn test_supplied_events_are_filtered_to_day_and_skip_midnight() {
        let ev = |ts: NaiveDateTime| SensorChangeEvent {
            timestamp: ts,
            confidence: Confidence::Confirmed,
            source: EventSource::Alert,
            raw_alert_text: Some("SENSOR CONNECTED".to_string()),
            gap_minutes: None,
        };
        let events = vec![ev(at(1, 0, 0)), ev(at(1, 7, 15)), ev(at(2, 8, 0))];
        let readings = make_day(1, |_| 120.0);
        let p = build_day_profile(&readings, date(1), Some(&events), &EngineConfig::default());
        assert_eq!(p.sensor_changes.len(), 1);
        assert_eq!(p.sensor_changes[0].timestamp, at(1, 7, 15));
        assert_eq!(p.sensor_changes[0].label.as_deref(), Some("SENSOR CONNECTED"));
    }

    #[test]
    fn test_recent_day_profiles_newest_first() {
        let mut readings = Vec::new();
        for d in 1..=9 {
            readings.extend(make_day(d, |_| 120.0).into_iter().take(12));
        }
        let profiles = recent_day_profiles(&readings, 7, None, &EngineConfig::default());
        assert_eq!(profiles.len(), 7);
        assert_eq!(profiles[0].date, date(9));
        assert_eq!(profiles[6].date, date(3));

        let few = recent_day_profiles(&readings[..24], 7, None, &EngineConfig::default());
        assert_eq!(few.len(), 2);
        assert!(recent_day_profiles(&[], 7, None, &EngineConfig::default()).is_empty());
    }
}
