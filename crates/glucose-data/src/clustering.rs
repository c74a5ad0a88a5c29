//! Sensor-change detection from device alerts and data gaps.
//!
//! A sensor change usually produces a burst of alerts (`CHANGE SENSOR`,
//! then `SENSOR CONNECTED` after insertion). Bursts are collapsed per
//! calendar day. A day whose alerts are spread too far apart is returned
//! as an ambiguous group for the caller to resolve and is never merged.
//! Resolved changes are then scored against nearby data gaps and given a
//! wear period that ends at the sensor's end-of-life gap.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use glucose_core::config::{EngineConfig, SensorConfig};
use glucose_core::models::{
    AmbiguousGroup, ClusterResult, Confidence, DayMarker, EventSource, EvidenceLevel,
    LifecycleStatus, RawAlert, Reading, SensorChangeEvent, SensorChangeReport, SensorLifecycle,
};
use glucose_core::time_utils::{minute_of_day, minutes_between};
use tracing::debug;

use crate::gaps::{detect_glucose_gaps, find_end_of_life_gap_start, find_gaps_near};

// ── Alert vocabulary ──────────────────────────────────────────────────────────

/// Whether `text` names a real sensor change.
///
/// Matching is a case-insensitive substring test against
/// `sensor.change_alerts`; signal-loss and warm-up alerts never match.
pub fn is_sensor_change_alert(text: &str, config: &SensorConfig) -> bool {
    let upper = text.to_uppercase();
    config
        .change_alerts
        .iter()
        .filter(|phrase| !phrase.trim().is_empty())
        .any(|phrase| upper.contains(&phrase.to_uppercase()))
}

/// Every row that carries alert text, in input order.
pub fn raw_alerts_from_readings(readings: &[Reading]) -> Vec<RawAlert> {
    readings
        .iter()
        .filter_map(|r| {
            r.alert_text.as_ref().map(|text| RawAlert {
                timestamp: r.timestamp,
                text: text.clone(),
            })
        })
        .collect()
}

// ── Clustering ────────────────────────────────────────────────────────────────

/// Split one day's chronological alerts into proximity clusters: an alert
/// joins the current cluster while it lies within `window_minutes` of that
/// cluster's first alert.
fn proximity_clusters(alerts: &[RawAlert], window_minutes: i64) -> Vec<Vec<RawAlert>> {
    let window = Duration::minutes(window_minutes);
    let mut clusters: Vec<Vec<RawAlert>> = Vec::new();
    for alert in alerts {
        if let Some(cluster) = clusters
            .last_mut()
            .filter(|c| alert.timestamp - c[0].timestamp <= window)
        {
            cluster.push(alert.clone());
            continue;
        }
        clusters.push(vec![alert.clone()]);
    }
    clusters
}

fn alert_event(alert: &RawAlert, confidence: Confidence) -> SensorChangeEvent {
    SensorChangeEvent {
        timestamp: alert.timestamp,
        confidence,
        source: EventSource::Alert,
        raw_alert_text: Some(alert.text.clone()),
        gap_minutes: None,
    }
}

/// Collapse sensor-change alerts into one event per day, or flag the day.
///
/// Alerts outside the sensor-change vocabulary are ignored. A day whose
/// matching alerts span at most `sensor.cluster_window_minutes` yields one
/// `Confirmed` event at its earliest alert. A wider day yields an
/// [`AmbiguousGroup`] holding every alert and one candidate per proximity
/// cluster.
pub fn deduplicate_sensor_events(raw_alerts: &[RawAlert], config: &EngineConfig) -> ClusterResult {
    let sensor = &config.sensor;
    let mut by_day: BTreeMap<NaiveDate, Vec<RawAlert>> = BTreeMap::new();
    for alert in raw_alerts
        .iter()
        .filter(|a| is_sensor_change_alert(&a.text, sensor))
    {
        by_day
            .entry(alert.timestamp.date())
            .or_default()
            .push(alert.clone());
    }

    let mut result = ClusterResult::default();
    for (date, mut alerts) in by_day {
        alerts.sort_by_key(|a| a.timestamp);
        let (first, last) = match (alerts.first(), alerts.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => continue,
        };
        let span_minutes = minutes_between(first.timestamp, last.timestamp);

        if span_minutes <= sensor.cluster_window_minutes as f64 {
            result
                .confirmed
                .push(alert_event(first, Confidence::Confirmed));
            continue;
        }

        let candidates: Vec<SensorChangeEvent> =
            proximity_clusters(&alerts, sensor.cluster_window_minutes)
                .iter()
                .map(|cluster| alert_event(&cluster[0], Confidence::Ambiguous))
                .collect();
        debug!(
            "{}: {} sensor alerts over {:.0} minutes need review ({} candidates)",
            date,
            alerts.len(),
            span_minutes,
            candidates.len()
        );
        result.ambiguous_groups.push(AmbiguousGroup {
            date,
            alerts,
            candidates,
            span_minutes,
        });
    }
    result
}

// ── Gap inference ─────────────────────────────────────────────────────────────

/// Sensor changes implied by data gaps with no supporting alert.
///
/// A gap between consecutive glucose readings counts when it lasts at least
/// `sensor.gap_min_minutes` and less than `sensor.gap_max_minutes`, and no
/// sensor-change alert falls inside it (widened by the cluster window on
/// both sides). Each yields an `Ambiguous` event at the gap start.
pub fn infer_gap_changes(
    readings: &[Reading],
    alerts: &[RawAlert],
    config: &EngineConfig,
) -> Vec<SensorChangeEvent> {
    let sensor = &config.sensor;
    let margin = Duration::minutes(sensor.cluster_window_minutes);
    let change_alerts: Vec<&RawAlert> = alerts
        .iter()
        .filter(|a| is_sensor_change_alert(&a.text, sensor))
        .collect();

    detect_glucose_gaps(readings, sensor.gap_min_minutes)
        .into_iter()
        .filter(|gap| minutes_between(gap.start, gap.end) < sensor.gap_max_minutes as f64)
        .filter(|gap| {
            !change_alerts
                .iter()
                .any(|a| a.timestamp >= gap.start - margin && a.timestamp <= gap.end + margin)
        })
        .map(|gap| SensorChangeEvent {
            timestamp: gap.start,
            confidence: Confidence::Ambiguous,
            source: EventSource::Gap,
            raw_alert_text: None,
            gap_minutes: Some(gap.duration_minutes),
        })
        .collect()
}

// ── Lifecycles ────────────────────────────────────────────────────────────────

fn evidence_score(event: &SensorChangeEvent, nearby_gap_minutes: Option<i64>) -> u32 {
    let base = match (event.source, event.confidence) {
        (EventSource::Alert, Confidence::Confirmed) => 70,
        (EventSource::Alert, Confidence::Ambiguous) => 50,
        (EventSource::Gap, _) => 40,
    };
    let gap_bonus = match nearby_gap_minutes {
        Some(m) if m >= 240 => 20,
        Some(m) if m >= 120 => 10,
        _ => 0,
    };
    base + gap_bonus
}

/// A gap-inferred change sits on the gap it came from; the new sensor only
/// starts reporting at the gap's end.
fn wear_start(event: &SensorChangeEvent) -> NaiveDateTime {
    match (event.source, event.gap_minutes) {
        (EventSource::Gap, Some(minutes)) => event.timestamp + Duration::minutes(minutes),
        _ => event.timestamp,
    }
}

/// Wear periods for a list of sensor starts.
///
/// Each start is scored from its own evidence plus the longest data gap
/// beginning within `sensor.match_window_hours` of it. A sensor's period
/// runs until the next sensor starts reporting; its `stopped_at` is the
/// first end-of-life gap inside that period.
pub fn sensor_lifecycles(
    readings: &[Reading],
    starts: &[SensorChangeEvent],
    config: &EngineConfig,
) -> Vec<SensorLifecycle> {
    let sensor = &config.sensor;
    let gaps = detect_glucose_gaps(readings, sensor.end_of_life_gap_minutes);
    let mut starts: Vec<&SensorChangeEvent> = starts.iter().collect();
    starts.sort_by_key(|e| e.timestamp);

    starts
        .iter()
        .enumerate()
        .map(|(i, event)| {
            let next_start = starts.get(i + 1).map(|next| wear_start(next));
            let nearby_gap_minutes =
                find_gaps_near(&gaps, event.timestamp, sensor.match_window_hours)
                    .iter()
                    .map(|g| g.duration_minutes)
                    .max();
            let score = evidence_score(event, nearby_gap_minutes);
            let stopped_at = find_end_of_life_gap_start(
                readings,
                wear_start(event),
                next_start,
                sensor.end_of_life_gap_minutes,
            );
            let status = match (stopped_at, next_start) {
                (Some(_), _) => LifecycleStatus::Ended,
                (None, Some(_)) => LifecycleStatus::Unknown,
                (None, None) => LifecycleStatus::Active,
            };
            SensorLifecycle {
                started_at: event.timestamp,
                source: event.source,
                confidence: event.confidence,
                nearby_gap_minutes,
                score,
                level: EvidenceLevel::from_score(score),
                stopped_at,
                status,
            }
        })
        .collect()
}

/// Alert clustering plus gap inference over a whole reading set.
///
/// Lifecycles are built from the confirmed and gap-inferred changes;
/// ambiguous days wait for manual resolution.
pub fn detect_sensor_changes(readings: &[Reading], config: &EngineConfig) -> SensorChangeReport {
    let alerts = raw_alerts_from_readings(readings);
    let clusters = deduplicate_sensor_events(&alerts, config);
    let inferred = infer_gap_changes(readings, &alerts, config);
    let starts: Vec<SensorChangeEvent> = clusters
        .confirmed
        .iter()
        .chain(inferred.iter())
        .cloned()
        .collect();
    let lifecycles = sensor_lifecycles(readings, &starts, config);
    debug!(
        "Sensor changes: {} confirmed, {} ambiguous days, {} gap-inferred, {} ended",
        clusters.confirmed.len(),
        clusters.ambiguous_groups.len(),
        inferred.len(),
        lifecycles
            .iter()
            .filter(|l| l.status == LifecycleStatus::Ended)
            .count()
    );
    SensorChangeReport {
        confirmed: clusters.confirmed,
        ambiguous_groups: clusters.ambiguous_groups,
        inferred,
        lifecycles,
    }
}

// ── Cartridge changes ─────────────────────────────────────────────────────────

/// Pump rewinds, which mark an insulin cartridge change.
pub fn detect_cartridge_changes(readings: &[Reading]) -> Vec<DayMarker> {
    readings
        .iter()
        .filter(|r| r.is_rewind)
        .map(|r| DayMarker {
            timestamp: r.timestamp,
            minute_of_day: minute_of_day(r.timestamp),
            source: EventSource::Alert,
            confidence: Confidence::Confirmed,
            label: Some("Rewind".to_string()),
            gap_minutes: None,
        })
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn make_alert(d: u32, h: u32, m: u32, text: &str) -> RawAlert {
        RawAlert {
            timestamp: at(d, h, m),
            text: text.to_string(),
        }
    }

    /// Glucose every 5 minutes over `[from, to]`.
    fn make_run(from: NaiveDateTime, to: NaiveDateTime) -> Vec<Reading> {
        let mut out = Vec::new();
        let mut t = from;
        while t <= to {
            out.push(Reading::glucose(t, 120.0));
            t += Duration::minutes(5);
        }
        out
    }

    fn cluster(alerts: &[RawAlert]) -> ClusterResult {
        deduplicate_sensor_events(alerts, &EngineConfig::default())
    }

    // ── Vocabulary ───────────────────────────────────────────────────────────

    #[test]
    fn test_vocabulary_matches_change_alerts_only() {
        let sensor = SensorConfig::default();
        assert!(is_sensor_change_alert("SENSOR CONNECTED", &sensor));
        assert!(is_sensor_change_alert("Sensor connected", &sensor));
        assert!(is_sensor_change_alert("CHANGE SENSOR", &sensor));
        assert!(!is_sensor_change_alert("LOST SENSOR SIGNAL", &sensor));
        assert!(!is_sensor_change_alert("SENSOR UPDATING ALERT", &sensor));
        assert!(!is_sensor_change_alert("", &sensor));
    }

    #[test]
    fn test_vocabulary_is_configurable() {
        let sensor = SensorConfig {
            change_alerts: vec!["NEW SENSOR".to_string()],
            ..SensorConfig::default()
        };
        assert!(is_sensor_change_alert("new sensor started", &sensor));
        assert!(!is_sensor_change_alert("SENSOR CONNECTED", &sensor));
    }

    // ── Deduplication ────────────────────────────────────────────────────────

    #[test]
    fn test_burst_within_window_collapses_to_earliest() {
        let result = cluster(&[
            make_alert(1, 9, 20, "SENSOR CONNECTED"),
            make_alert(1, 9, 0, "CHANGE SENSOR"),
            make_alert(1, 9, 10, "LOST SENSOR SIGNAL"),
        ]);
        assert_eq!(result.confirmed.len(), 1);
        assert!(result.ambiguous_groups.is_empty());
        let ev = &result.confirmed[0];
        assert_eq!(ev.timestamp, at(1, 9, 0));
        assert_eq!(ev.confidence, Confidence::Confirmed);
        assert_eq!(ev.source, EventSource::Alert);
        assert_eq!(ev.raw_alert_text.as_deref(), Some("CHANGE SENSOR"));
    }

    #[test]
    fn test_span_of_exactly_window_is_confirmed() {
        let result = cluster(&[
            make_alert(1, 9, 0, "CHANGE SENSOR"),
            make_alert(1, 10, 0, "SENSOR CONNECTED"),
        ]);
        assert_eq!(result.confirmed.len(), 1);
    }

    #[test]
    fn test_wide_day_is_ambiguous_and_not_merged() {
        let result = cluster(&[
            make_alert(1, 8, 0, "CHANGE SENSOR"),
            make_alert(1, 8, 30, "SENSOR CONNECTED"),
            make_alert(1, 14, 0, "SENSOR CONNECTED"),
        ]);
        assert!(result.confirmed.is_empty());
        assert_eq!(result.ambiguous_groups.len(), 1);
        let group = &result.ambiguous_groups[0];
        assert_eq!(group.date, NaiveDate::from_ymd_opt(2025, 10, 1).unwrap());
        assert_eq!(group.alerts.len(), 3);
        assert!((group.span_minutes - 360.0).abs() < 1e-9);
        let times: Vec<NaiveDateTime> = group.candidates.iter().map(|c| c.timestamp).collect();
        assert_eq!(times, vec![at(1, 8, 0), at(1, 14, 0)]);
        assert!(group
            .candidates
            .iter()
            .all(|c| c.confidence == Confidence::Ambiguous));
    }

    #[test]
    fn test_days_are_clustered_independently() {
        let result = cluster(&[
            make_alert(1, 23, 50, "CHANGE SENSOR"),
            make_alert(2, 0, 10, "SENSOR CONNECTED"),
        ]);
        assert_eq!(result.confirmed.len(), 2);
        assert_eq!(result.confirmed[1].timestamp, at(2, 0, 10));
    }

    #[test]
    fn test_noise_only_yields_nothing() {
        let result = cluster(&[
            make_alert(1, 9, 0, "LOST SENSOR SIGNAL"),
            make_alert(1, 9, 5, "SENSOR UPDATING ALERT"),
        ]);
        assert_eq!(result, ClusterResult::default());
    }

    #[test]
    fn test_raw_alerts_from_readings() {
        let readings = vec![
            Reading::glucose(at(1, 8, 0), 100.0),
            Reading::event(at(1, 9, 0)).with_alert("SENSOR CONNECTED"),
            Reading::event(at(1, 9, 5)).with_rewind(),
        ];
        let alerts = raw_alerts_from_readings(&readings);
        assert_eq!(alerts, vec![make_alert(1, 9, 0, "SENSOR CONNECTED")]);
    }

    // ── Gap inference ────────────────────────────────────────────────────────

    #[test]
    fn test_gap_in_window_is_inferred() {
        // 10:00 → 13:20 is a 200-minute gap.
        let mut readings = make_run(at(1, 8, 0), at(1, 10, 0));
        readings.extend(make_run(at(1, 13, 20), at(1, 15, 0)));
        let events = infer_gap_changes(&readings, &[], &EngineConfig::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, at(1, 10, 0));
        assert_eq!(events[0].source, EventSource::Gap);
        assert_eq!(events[0].confidence, Confidence::Ambiguous);
        assert_eq!(events[0].gap_minutes, Some(200));
    }

    #[test]
    fn test_gap_bounds() {
        let config = EngineConfig::default();
        // 179 minutes: too short.
        let mut readings = make_run(at(1, 8, 0), at(1, 10, 0));
        readings.push(Reading::glucose(at(1, 12, 59), 110.0));
        assert!(infer_gap_changes(&readings, &[], &config).is_empty());

        // Exactly 180: counted.
        let mut readings = make_run(at(1, 8, 0), at(1, 10, 0));
        readings.push(Reading::glucose(at(1, 13, 0), 110.0));
        assert_eq!(infer_gap_changes(&readings, &[], &config).len(), 1);

        // Exactly 600: absence, not a change.
        let mut readings = make_run(at(1, 0, 0), at(1, 1, 0));
        readings.push(Reading::glucose(at(1, 11, 0), 110.0));
        assert!(infer_gap_changes(&readings, &[], &config).is_empty());
    }

    #[test]
    fn test_gap_with_alert_is_not_inferred() {
        let mut readings = make_run(at(1, 8, 0), at(1, 10, 0));
        readings.extend(make_run(at(1, 13, 20), at(1, 15, 0)));
        // Alert 30 minutes after the gap closes, inside the margin.
        let alerts = vec![make_alert(1, 13, 50, "SENSOR CONNECTED")];
        assert!(infer_gap_changes(&readings, &alerts, &EngineConfig::default()).is_empty());

        // Noise alerts do not suppress inference.
        let alerts = vec![make_alert(1, 11, 0, "LOST SENSOR SIGNAL")];
        assert_eq!(
            infer_gap_changes(&readings, &alerts, &EngineConfig::default()).len(),
            1
        );
    }

    #[test]
    fn test_detect_sensor_changes_combines_sources() {
        let mut readings = make_run(at(1, 0, 0), at(1, 10, 0));
        readings.push(Reading::event(at(1, 9, 0)).with_alert("SENSOR CONNECTED"));
        readings.extend(make_run(at(2, 0, 0), at(2, 6, 0)));
        readings.extend(make_run(at(2, 9, 30), at(2, 23, 55)));
        readings.sort_by_key(|r| r.timestamp);

        let report = detect_sensor_changes(&readings, &EngineConfig::default());
        assert_eq!(report.confirmed.len(), 1);
        assert_eq!(report.confirmed[0].timestamp, at(1, 9, 0));
        // 10:00 day 1 → 00:00 day 2 is 840 minutes (absence); 06:00 → 09:30 is 210.
        assert_eq!(report.inferred.len(), 1);
        assert_eq!(report.inferred[0].timestamp, at(2, 6, 0));
        assert_eq!(report.all_events().len(), 2);

        assert_eq!(report.lifecycles.len(), 2);
        let first = &report.lifecycles[0];
        assert_eq!(first.started_at, at(1, 9, 0));
        assert_eq!(first.nearby_gap_minutes, Some(840));
        assert_eq!(first.score, 90);
        assert_eq!(first.level, EvidenceLevel::High);
        assert_eq!(first.stopped_at, Some(at(1, 10, 0)));
        assert_eq!(first.status, LifecycleStatus::Ended);

        let second = &report.lifecycles[1];
        assert_eq!(second.source, EventSource::Gap);
        assert_eq!(second.nearby_gap_minutes, Some(210));
        assert_eq!(second.score, 50);
        assert_eq!(second.level, EvidenceLevel::Medium);
        assert_eq!(second.stopped_at, None);
        assert_eq!(second.status, LifecycleStatus::Active);
    }

    // ── Lifecycles ───────────────────────────────────────────────────────────

    fn make_start(d: u32, h: u32, m: u32) -> SensorChangeEvent {
        SensorChangeEvent {
            timestamp: at(d, h, m),
            confidence: Confidence::Confirmed,
            source: EventSource::Alert,
            raw_alert_text: Some("SENSOR CONNECTED".to_string()),
            gap_minutes: None,
        }
    }

    #[test]
    fn test_replaced_sensor_without_gap_is_unknown() {
        let readings = make_run(at(1, 0, 0), at(3, 12, 0));
        // Starts given newest first; lifecycles come back oldest first.
        let starts = vec![make_start(2, 8, 0), make_start(1, 8, 0)];
        let lifecycles = sensor_lifecycles(&readings, &starts, &EngineConfig::default());
        assert_eq!(lifecycles.len(), 2);
        assert_eq!(lifecycles[0].started_at, at(1, 8, 0));
        assert_eq!(lifecycles[0].status, LifecycleStatus::Unknown);
        assert_eq!(lifecycles[1].status, LifecycleStatus::Active);
        assert!(lifecycles.iter().all(|l| l.score == 70 && l.nearby_gap_minutes.is_none()));
    }

    #[test]
    fn test_gap_before_next_alert_ends_previous_sensor() {
        // Old sensor dies at 10:00 on day 2; the new one is connected at 13:50.
        let mut readings = make_run(at(1, 0, 0), at(2, 10, 0));
        readings.extend(make_run(at(2, 14, 0), at(3, 12, 0)));
        let starts = vec![make_start(1, 7, 0), make_start(2, 13, 50)];
        let lifecycles = sensor_lifecycles(&readings, &starts, &EngineConfig::default());
        assert_eq!(lifecycles[0].stopped_at, Some(at(2, 10, 0)));
        assert_eq!(lifecycles[0].status, LifecycleStatus::Ended);
        // The 240-minute gap sits within six hours of the new sensor.
        assert_eq!(lifecycles[1].nearby_gap_minutes, Some(240));
        assert_eq!(lifecycles[1].level, EvidenceLevel::High);
        assert_eq!(lifecycles[1].status, LifecycleStatus::Active);
    }

    #[test]
    fn test_no_starts_no_lifecycles() {
        let readings = make_run(at(1, 0, 0), at(1, 12, 0));
        assert!(sensor_lifecycles(&readings, &[], &EngineConfig::default()).is_empty());
    }

    #[test]
    fn test_detect_cartridge_changes() {
        let readings = vec![
            Reading::glucose(at(1, 8, 0), 100.0),
            Reading::event(at(1, 19, 30)).with_rewind(),
        ];
        let markers = detect_cartridge_changes(&readings);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].minute_of_day, 19 * 60 + 30);
        assert_eq!(markers[0].label.as_deref(), Some("Rewind"));
    }
}
