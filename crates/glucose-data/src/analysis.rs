//! Engine facade and the full analysis pipeline.
//!
//! [`GlucoseEngine`] binds one immutable [`EngineConfig`] and runs every
//! stage against it: parsing, summary metrics, AGP, episodes, sensor
//! changes, insulin totals and day profiles. [`GlucoseEngine::analyze`] combines them into
//! an [`AnalysisResult`] ready for rendering or export.

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::NaiveDate;
use glucose_core::calculations::{self, MetricsOptions};
use glucose_core::config::EngineConfig;
use glucose_core::error::{FormatError, GlucoseError, Result};
use glucose_core::models::{
    AgpBin, ClusterResult, DayProfile, EpisodeSet, InsulinDay, InsulinSummary, MetricsResult,
    RawAlert, Reading, ReadingSet, RunMetadata, SensorChangeEvent, SensorChangeReport,
};
use glucose_core::time_utils::DateWindow;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{aggregator, analyzer, clustering, day_profile, insulin, reader};

// ── Public types ──────────────────────────────────────────────────────────────

/// Metadata produced alongside the analysis result.
///
/// Carries no wall-clock values, so the same input always serialises to the
/// same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    /// Calendar window that was analysed.
    pub window: DateWindow,
    /// Rows inside the window, event-only rows included.
    pub rows_processed: usize,
    /// Rows inside the window that carry a glucose value.
    pub glucose_readings: usize,
    pub days_with_data: usize,
    pub profiles_built: usize,
    pub sensor_changes_detected: usize,
    /// Patient and device details from the export header, when known.
    pub run: RunMetadata,
}

/// The complete output of [`GlucoseEngine::analyze`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// `None` when no glucose reading passes the window and options.
    pub metrics: Option<MetricsResult>,
    pub agp: Vec<AgpBin>,
    pub episodes: EpisodeSet,
    pub sensor_changes: SensorChangeReport,
    /// Daily bolus statistics; `None` when no bolus falls in the window.
    pub insulin: Option<InsulinSummary>,
    /// One profile per date in the window that has rows, newest first.
    pub day_profiles: Vec<DayProfile>,
    pub metadata: AnalysisMetadata,
}

// ── GlucoseEngine ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct GlucoseEngine {
    config: EngineConfig,
}

impl GlucoseEngine {
    /// Bind `config` as given. Use [`try_new`](Self::try_new) for
    /// configurations that have not been validated.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Validate `config` and bind it.
    pub fn try_new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Build an engine from a JSON configuration override.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(Self::new(EngineConfig::from_json_str(json)?))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn parse(&self, raw_text: &str) -> std::result::Result<ReadingSet, FormatError> {
        reader::parse(raw_text, &self.config)
    }

    pub fn calculate_metrics(
        &self,
        readings: &[Reading],
        window: DateWindow,
        options: &MetricsOptions,
    ) -> Option<MetricsResult> {
        calculations::calculate_metrics(readings, window, options, &self.config)
    }

    pub fn calculate_agp(&self, readings: &[Reading], window: DateWindow) -> Vec<AgpBin> {
        aggregator::calculate_agp(readings, window, &self.config)
    }

    pub fn detect_events(&self, readings: &[Reading], window: DateWindow) -> EpisodeSet {
        analyzer::detect_events(readings, window, &self.config)
    }

    pub fn daily_insulin(&self, readings: &[Reading], window: DateWindow) -> Vec<InsulinDay> {
        insulin::daily_insulin(readings, window)
    }

    pub fn insulin_summary(
        &self,
        readings: &[Reading],
        window: DateWindow,
    ) -> Option<InsulinSummary> {
        insulin::insulin_summary(&self.daily_insulin(readings, window))
    }

    pub fn build_day_profile(
        &self,
        readings: &[Reading],
        date: NaiveDate,
        sensor_events: Option<&[SensorChangeEvent]>,
    ) -> DayProfile {
        day_profile::build_day_profile(readings, date, sensor_events, &self.config)
    }

    pub fn cluster_sensor_alerts(&self, raw_alerts: &[RawAlert]) -> ClusterResult {
        clustering::deduplicate_sensor_events(raw_alerts, &self.config)
    }

    pub fn detect_sensor_changes(&self, readings: &[Reading]) -> SensorChangeReport {
        clustering::detect_sensor_changes(readings, &self.config)
    }

    /// Profiles for the newest `n` dates, with sensor markers taken from
    /// whole-set detection so gaps spanning midnight are still seen.
    pub fn recent_day_profiles(&self, readings: &[Reading], n: usize) -> Vec<DayProfile> {
        let events = self.detect_sensor_changes(readings).all_events();
        day_profile::recent_day_profiles(readings, n, Some(&events), &self.config)
    }

    /// Run every stage over the readings in `window`.
    ///
    /// `options` narrows the summary metrics only; AGP, episodes, sensor
    /// changes and day profiles always cover the whole window.
    pub fn analyze(
        &self,
        readings: &[Reading],
        window: DateWindow,
        options: &MetricsOptions,
    ) -> AnalysisResult {
        self.run_pipeline(readings, window, options, RunMetadata::default())
    }

    /// Like [`analyze`](Self::analyze), keeping the export's run metadata.
    pub fn analyze_set(
        &self,
        set: &ReadingSet,
        window: DateWindow,
        options: &MetricsOptions,
    ) -> AnalysisResult {
        self.run_pipeline(&set.readings, window, options, set.metadata.clone())
    }

    /// Parse a raw export and analyse its full date span.
    pub fn analyze_export(&self, raw_text: &str, options: &MetricsOptions) -> Result<AnalysisResult> {
        let set = self.parse(raw_text)?;
        // A successful parse holds at least one row.
        let window = data_window(&set.readings).ok_or(GlucoseError::Format(FormatError::Empty))?;
        info!(
            "Analysing {} rows from {} to {}",
            set.readings.len(),
            window.start,
            window.end
        );
        Ok(self.analyze_set(&set, window, options))
    }

    fn run_pipeline(
        &self,
        readings: &[Reading],
        window: DateWindow,
        options: &MetricsOptions,
        run: RunMetadata,
    ) -> AnalysisResult {
        let started = Instant::now();

        // ── Step 1: Window ────────────────────────────────────────────────────
        let in_window: Vec<Reading> = readings
            .iter()
            .filter(|r| window.contains(r.timestamp))
            .cloned()
            .collect();

        // ── Step 2: Period statistics ─────────────────────────────────────────
        let metrics = self.calculate_metrics(&in_window, window, options);
        let agp = self.calculate_agp(&in_window, window);
        let episodes = self.detect_events(&in_window, window);
        let insulin = self.insulin_summary(&in_window, window);

        // ── Step 3: Sensor changes ────────────────────────────────────────────
        let sensor_changes = self.detect_sensor_changes(&in_window);
        let events = sensor_changes.all_events();

        // ── Step 4: Day profiles ──────────────────────────────────────────────
        let dates: BTreeSet<NaiveDate> = in_window.iter().map(|r| r.date()).collect();
        let day_profiles: Vec<DayProfile> = dates
            .iter()
            .rev()
            .map(|date| self.build_day_profile(&in_window, *date, Some(&events)))
            .collect();

        // ── Step 5: Build result ──────────────────────────────────────────────
        let metadata = AnalysisMetadata {
            window,
            rows_processed: in_window.len(),
            glucose_readings: in_window
                .iter()
                .filter(|r| r.glucose_mg_dl.is_some())
                .count(),
            days_with_data: dates.len(),
            profiles_built: day_profiles.len(),
            sensor_changes_detected: events.len(),
            run,
        };

        debug!(
            rows = metadata.rows_processed,
            days = metadata.days_with_data,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis complete"
        );

        AnalysisResult {
            metrics,
            agp,
            episodes,
            sensor_changes,
            insulin,
            day_profiles,
            metadata,
        }
    }
}

/// Calendar span of `readings`, or `None` when there are none.
pub fn data_window(readings: &[Reading]) -> Option<DateWindow> {
    let first = readings.iter().map(|r| r.date()).min()?;
    let last = readings.iter().map(|r| r.date()).max()?;
    Some(DateWindow::new(first, last))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
