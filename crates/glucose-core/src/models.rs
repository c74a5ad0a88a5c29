use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::time_utils::minute_of_day;

// ── Readings ──────────────────────────────────────────────────────────────────

/// A single row of a CGM / pump export.
///
/// Rows without a glucose value are pump-event rows (rewind, bolus, alert);
/// they are excluded from statistics but kept for event detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Local wall-clock time the row was recorded.
    pub timestamp: NaiveDateTime,
    /// Sensor glucose in mg/dL, always within the configured valid range.
    pub glucose_mg_dl: Option<f64>,
    /// Delivered bolus volume in units (0 when absent).
    #[serde(default)]
    pub bolus_units: f64,
    /// Carbohydrate input in grams (0 when absent).
    #[serde(default)]
    pub carbs_g: f64,
    /// Finger-stick BG meter value in mg/dL.
    #[serde(default)]
    pub bg_meter_mg_dl: Option<f64>,
    /// Raw device alert text.
    #[serde(default)]
    pub alert_text: Option<String>,
    /// Whether the pump logged a rewind (cartridge change) on this row.
    #[serde(default)]
    pub is_rewind: bool,
}

impl Reading {
    /// A plain sensor reading.
    pub fn glucose(timestamp: NaiveDateTime, mg_dl: f64) -> Self {
        Self {
            timestamp,
            glucose_mg_dl: Some(mg_dl),
            ..Self::event(timestamp)
        }
    }

    /// An event-only row with no glucose and no pump data yet.
    pub fn event(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            glucose_mg_dl: None,
            bolus_units: 0.0,
            carbs_g: 0.0,
            bg_meter_mg_dl: None,
            alert_text: None,
            is_rewind: false,
        }
    }

    pub fn with_alert(mut self, text: impl Into<String>) -> Self {
        self.alert_text = Some(text.into());
        self
    }

    pub fn with_rewind(mut self) -> Self {
        self.is_rewind = true;
        self
    }

    /// Calendar date of the reading.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// Whether the row carries pump or device event data.
    pub fn has_event(&self) -> bool {
        self.is_rewind || self.bolus_units > 0.0 || self.alert_text.is_some()
    }
}

/// Patient and device details from the export's header block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub patient_name: Option<String>,
    pub device: Option<String>,
    pub device_serial: Option<String>,
    pub cgm: Option<String>,
}

impl RunMetadata {
    pub fn is_empty(&self) -> bool {
        self.patient_name.is_none()
            && self.device.is_none()
            && self.device_serial.is_none()
            && self.cgm.is_none()
    }
}

/// How the column layout of the data rows was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    /// Column indices were looked up by header name.
    Header,
    /// The canonical fixed offsets were used.
    Fixed,
}

/// Row counters collected while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    pub valid_rows: usize,
    pub skipped_rows: usize,
    /// Glucose values outside the valid range that were discarded.
    pub rejected_glucose: usize,
    pub rewind_count: usize,
    pub sensor_alert_count: usize,
    /// Layout of the first parsed section.
    pub layout: LayoutKind,
}

impl ParseStats {
    /// Share of candidate rows that produced a reading, in percent.
    pub fn coverage_percent(&self) -> f64 {
        let total = self.valid_rows + self.skipped_rows;
        if total == 0 {
            return 0.0;
        }
        self.valid_rows as f64 / total as f64 * 100.0
    }
}

/// Parsed export: sorted readings plus header metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingSet {
    /// Readings sorted ascending by timestamp; equal timestamps keep file order.
    pub readings: Vec<Reading>,
    pub metadata: RunMetadata,
    pub stats: ParseStats,
}

// ── Metrics ───────────────────────────────────────────────────────────────────

/// Sensor uptime for the analysed window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    pub uptime_percent: f64,
    pub missing_percent: f64,
    /// Days with a full set of readings.
    pub complete_days: usize,
    pub total_days: usize,
    pub expected_readings: usize,
    pub actual_readings: usize,
}

/// Summary statistics for a reading set over a date window.
///
/// Values are unrounded; `sd` (and therefore `cv`) is NaN for a single
/// reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsResult {
    pub mean: f64,
    pub sd: f64,
    pub cv: f64,
    /// Percent of readings within the target range.
    pub tir: f64,
    /// Percent of readings above the target range.
    pub tar: f64,
    /// Percent of readings below the target range.
    pub tbr: f64,
    /// Percent below the critical low threshold (level 2).
    pub tbr_very_low: f64,
    /// Percent between critical low and low (level 1).
    pub tbr_low: f64,
    /// Percent above high up to critical high.
    pub tar_high: f64,
    /// Percent above critical high.
    pub tar_very_high: f64,
    pub gmi: f64,
    pub gri: f64,
    pub mage: f64,
    pub modd: f64,
    pub min: f64,
    pub max: f64,
    pub reading_count: usize,
    pub days: usize,
    pub data_quality: DataQuality,
}

// ── AGP ───────────────────────────────────────────────────────────────────────

/// One time-of-day slot of the Ambulatory Glucose Profile.
///
/// Every statistic is `None` when no reading fell into the slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgpBin {
    pub bin_index: usize,
    pub p5: Option<f64>,
    pub p25: Option<f64>,
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub p95: Option<f64>,
    pub mean: Option<f64>,
    pub count: usize,
}

impl AgpBin {
    pub fn empty(bin_index: usize) -> Self {
        Self {
            bin_index,
            p5: None,
            p25: None,
            p50: None,
            p75: None,
            p95: None,
            mean: None,
            count: 0,
        }
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

// ── Episodes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeKind {
    Hypo,
    Hyper,
}

/// Classification applied once an episode has closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Hypo with nadir below the critical low threshold.
    Severe,
    /// Hypo with nadir at or above the critical low threshold.
    Low,
    /// Any hyper episode.
    High,
}

/// A contiguous out-of-range run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub kind: EpisodeKind,
    pub start: NaiveDateTime,
    /// Timestamp of the first in-range reading that closed the run.
    pub end: NaiveDateTime,
    pub start_glucose: f64,
    /// Nadir for hypo episodes, peak for hyper episodes.
    pub extreme: f64,
    pub severity: Severity,
    pub duration_minutes: i64,
    /// Minute of day of `start`, for marker placement.
    pub minute_of_day: u32,
}

/// Episodes detected over a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSet {
    pub hypo_episodes: Vec<Episode>,
    pub hyper_episodes: Vec<Episode>,
}

/// Counts and average durations derived from an [`EpisodeSet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub hypo_count: usize,
    pub severe_count: usize,
    pub low_count: usize,
    pub hyper_count: usize,
    pub avg_hypo_duration: i64,
    pub avg_severe_duration: i64,
    pub avg_low_duration: i64,
    pub avg_hyper_duration: i64,
}

impl EpisodeSet {
    pub fn hypo_count(&self) -> usize {
        self.hypo_episodes.len()
    }

    pub fn count_severity(&self, severity: Severity) -> usize {
        self.hypo_episodes
            .iter()
            .chain(self.hyper_episodes.iter())
            .filter(|e| e.severity == severity)
            .count()
    }

    /// Counts and rounded average durations per severity class.
    pub fn summary(&self) -> EpisodeSummary {
        let severe: Vec<&Episode> = self
            .hypo_episodes
            .iter()
            .filter(|e| e.severity == Severity::Severe)
            .collect();
        let low: Vec<&Episode> = self
            .hypo_episodes
            .iter()
            .filter(|e| e.severity == Severity::Low)
            .collect();
        EpisodeSummary {
            hypo_count: self.hypo_episodes.len(),
            severe_count: severe.len(),
            low_count: low.len(),
            hyper_count: self.hyper_episodes.len(),
            avg_hypo_duration: average_duration(self.hypo_episodes.iter()),
            avg_severe_duration: average_duration(severe.into_iter()),
            avg_low_duration: average_duration(low.into_iter()),
            avg_hyper_duration: average_duration(self.hyper_episodes.iter()),
        }
    }
}

fn average_duration<'a>(episodes: impl Iterator<Item = &'a Episode>) -> i64 {
    let (total, n) = episodes.fold((0i64, 0i64), |(t, n), e| (t + e.duration_minutes, n + 1));
    if n == 0 {
        return 0;
    }
    (total as f64 / n as f64).round() as i64
}

// ── Device events ─────────────────────────────────────────────────────────────

/// A device alert row as exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAlert {
    pub timestamp: NaiveDateTime,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Confirmed,
    Ambiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Alert,
    Gap,
}

/// A detected or candidate sensor change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorChangeEvent {
    pub timestamp: NaiveDateTime,
    pub confidence: Confidence,
    pub source: EventSource,
    pub raw_alert_text: Option<String>,
    /// Length of the data gap for gap-inferred events.
    pub gap_minutes: Option<i64>,
}

/// Same-day sensor alerts too far apart to collapse automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbiguousGroup {
    pub date: NaiveDate,
    /// Every matching alert of the day, chronological.
    pub alerts: Vec<RawAlert>,
    /// One candidate per proximity cluster (its earliest alert).
    pub candidates: Vec<SensorChangeEvent>,
    /// Minutes between the first and last alert of the day.
    pub span_minutes: f64,
}

/// Output of alert deduplication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterResult {
    pub confirmed: Vec<SensorChangeEvent>,
    pub ambiguous_groups: Vec<AmbiguousGroup>,
}

/// All sensor-change evidence for a reading set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorChangeReport {
    pub confirmed: Vec<SensorChangeEvent>,
    pub ambiguous_groups: Vec<AmbiguousGroup>,
    /// Gap-inferred changes with no supporting alert.
    pub inferred: Vec<SensorChangeEvent>,
    /// Wear periods of the confirmed and gap-inferred sensors, oldest first.
    #[serde(default)]
    pub lifecycles: Vec<SensorLifecycle>,
}

impl SensorChangeReport {
    /// Confirmed and inferred events, plus the candidates of ambiguous groups,
    /// in chronological order.
    pub fn all_events(&self) -> Vec<SensorChangeEvent> {
        let mut events: Vec<SensorChangeEvent> = self
            .confirmed
            .iter()
            .chain(self.inferred.iter())
            .chain(self.ambiguous_groups.iter().flat_map(|g| g.candidates.iter()))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        events
    }
}

/// How strongly the evidence supports a sensor change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceLevel {
    High,
    Medium,
    Low,
}

impl EvidenceLevel {
    /// `High` from 80, `Medium` from 50.
    pub fn from_score(score: u32) -> Self {
        if score >= 80 {
            EvidenceLevel::High
        } else if score >= 50 {
            EvidenceLevel::Medium
        } else {
            EvidenceLevel::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    /// An end-of-life gap was found before the next sensor.
    Ended,
    /// The newest sensor, still reporting at the last reading.
    Active,
    /// Replaced without a visible end-of-life gap.
    Unknown,
}

/// One sensor's wear period, from its change event to the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorLifecycle {
    pub started_at: NaiveDateTime,
    pub source: EventSource,
    pub confidence: Confidence,
    /// Longest data gap starting near `started_at`, if any.
    pub nearby_gap_minutes: Option<i64>,
    pub score: u32,
    pub level: EvidenceLevel,
    /// Last reading before the sensor went silent.
    pub stopped_at: Option<NaiveDateTime>,
    pub status: LifecycleStatus,
}

// ── Insulin ───────────────────────────────────────────────────────────────────

/// Bolus insulin and carbohydrate entries of one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsulinDay {
    pub date: NaiveDate,
    /// Delivered bolus volume (U).
    pub bolus_units: f64,
    pub bolus_count: usize,
    pub carbs_g: f64,
    pub carb_entries: usize,
}

impl InsulinDay {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            bolus_units: 0.0,
            bolus_count: 0,
            carbs_g: 0.0,
            carb_entries: 0,
        }
    }

    /// Add one row's bolus and carbs to the day's totals.
    pub fn add_reading(&mut self, reading: &Reading) {
        if reading.bolus_units > 0.0 {
            self.bolus_units += reading.bolus_units;
            self.bolus_count += 1;
        }
        if reading.carbs_g > 0.0 {
            self.carbs_g += reading.carbs_g;
            self.carb_entries += 1;
        }
    }

    pub fn has_insulin(&self) -> bool {
        self.bolus_count > 0
    }
}

/// Spread of daily bolus totals over a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsulinSummary {
    /// Days with at least one bolus.
    pub days: usize,
    pub mean_daily_bolus: f64,
    /// Population SD of the daily totals.
    pub sd_daily_bolus: f64,
    pub cv_daily_bolus: f64,
    pub min_daily_bolus: f64,
    pub max_daily_bolus: f64,
    pub mean_daily_carbs: f64,
}

// ── Day profile ───────────────────────────────────────────────────────────────

/// One 5-minute point of a single-day curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub bin_index: usize,
    /// `HH:MM` start of the bin.
    pub time: String,
    /// `None` when the sensor produced nothing in this bin.
    pub glucose: Option<f64>,
}

/// A device-change marker placed on a day chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayMarker {
    pub timestamp: NaiveDateTime,
    pub minute_of_day: u32,
    pub source: EventSource,
    pub confidence: Confidence,
    pub label: Option<String>,
    pub gap_minutes: Option<i64>,
}

impl DayMarker {
    pub fn from_sensor_event(event: &SensorChangeEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            minute_of_day: minute_of_day(event.timestamp),
            source: event.source,
            confidence: event.confidence,
            label: event.raw_alert_text.clone(),
            gap_minutes: event.gap_minutes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeKind {
    PerfectDay,
    ZenMaster,
    SteadyDay,
}

impl BadgeKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            BadgeKind::PerfectDay => "Perfect Day",
            BadgeKind::ZenMaster => "Zen Master",
            BadgeKind::SteadyDay => "Steady Day",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub kind: BadgeKind,
    pub name: String,
    pub description: String,
}

/// Everything shown for a single calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayProfile {
    pub date: NaiveDate,
    pub weekday: String,
    /// `None` when the day has no glucose readings.
    pub metrics: Option<MetricsResult>,
    pub curve: Vec<CurvePoint>,
    pub episodes: EpisodeSet,
    pub sensor_changes: Vec<DayMarker>,
    pub cartridge_changes: Vec<DayMarker>,
    pub insulin: InsulinDay,
    pub badges: Vec<Badge>,
    /// All rows on the day, event rows included.
    pub reading_count: usize,
}

// ── Tests ──────────────────────────────────────────────────────────────────────
