use serde::{Deserialize, Serialize};

use crate::error::{GlucoseError, Result};

// ── Glucose thresholds ────────────────────────────────────────────────────────

/// Clinical glucose thresholds in mg/dL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlucoseThresholds {
    /// Lower bound of the target range (inclusive).
    pub low: f64,
    /// Upper bound of the target range (inclusive).
    pub high: f64,
    /// Level 2 hypoglycaemia: strictly below this value.
    pub critical_low: f64,
    /// Level 2 hyperglycaemia: strictly above this value.
    pub critical_high: f64,
    /// Smallest glucose value accepted at parse time.
    pub min_valid: f64,
    /// Largest glucose value accepted at parse time.
    pub max_valid: f64,
}

impl Default for GlucoseThresholds {
    fn default() -> Self {
        Self {
            low: 70.0,
            high: 180.0,
            critical_low: 54.0,
            critical_high: 250.0,
            min_valid: 20.0,
            max_valid: 600.0,
        }
    }
}

impl GlucoseThresholds {
    /// Whether `value` may be accepted as a sensor reading.
    pub fn is_valid(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min_valid && value <= self.max_valid
    }
}

// ── AGP ───────────────────────────────────────────────────────────────────────

/// How per-bin percentiles are derived from the pooled values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PercentileMethod {
    /// Nearest-rank: `sorted[floor(n * p)]`, clamped to the last element.
    #[default]
    Rank,
    /// Linear interpolation between closest ranks.
    Linear,
}

/// Ambulatory Glucose Profile settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgpConfig {
    /// Number of time-of-day bins (288 = 5-minute slots).
    pub bins: usize,
    pub percentile_method: PercentileMethod,
}

impl Default for AgpConfig {
    fn default() -> Self {
        Self {
            bins: 288,
            percentile_method: PercentileMethod::Rank,
        }
    }
}

impl AgpConfig {
    /// Width of a single bin in minutes.
    pub fn bin_minutes(&self) -> u32 {
        (1440 / self.bins.max(1)) as u32
    }
}

// ── Episodes ──────────────────────────────────────────────────────────────────

/// Hypo / hyper episode detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeConfig {
    /// Minimum hypo run length in minutes.
    pub hypo_min_duration: i64,
    /// Minimum hyper run length in minutes.
    pub hyper_min_duration: i64,
    /// A hyper run is open while glucose is strictly above this value.
    pub hyper_threshold: f64,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            hypo_min_duration: 15,
            hyper_min_duration: 120,
            hyper_threshold: 180.0,
        }
    }
}

// ── Time of day ───────────────────────────────────────────────────────────────

/// Hour boundaries for the night / day split, as half-open `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSplit {
    pub night_start: u32,
    pub night_end: u32,
    pub day_start: u32,
    pub day_end: u32,
}

impl Default for TimeSplit {
    fn default() -> Self {
        Self {
            night_start: 0,
            night_end: 6,
            day_start: 6,
            day_end: 24,
        }
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// CareLink export layout settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Number of metadata lines before the column header.
    pub skip_lines: usize,
    /// Minimum column count of the canonical fixed-offset layout.
    pub min_columns: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            skip_lines: 6,
            min_columns: 35,
        }
    }
}

// ── Sensor events ─────────────────────────────────────────────────────────────

/// Sensor-change clustering and gap-inference settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Alerts within this many minutes of a cluster's first alert belong to it.
    pub cluster_window_minutes: i64,
    /// Shortest data gap (inclusive) treated as a possible sensor change.
    pub gap_min_minutes: i64,
    /// Gaps this long or longer are treated as absence, not a change.
    pub gap_max_minutes: i64,
    /// Alert phrases that indicate a real sensor change (case-insensitive).
    pub change_alerts: Vec<String>,
    /// Gaps starting within this many hours of a change support it.
    pub match_window_hours: i64,
    /// Shortest silence that ends a sensor's wear period.
    pub end_of_life_gap_minutes: i64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            cluster_window_minutes: 60,
            gap_min_minutes: 180,
            gap_max_minutes: 600,
            change_alerts: vec!["SENSOR CONNECTED".to_string(), "CHANGE SENSOR".to_string()],
            match_window_hours: 6,
            end_of_life_gap_minutes: 120,
        }
    }
}

// ── Badges ────────────────────────────────────────────────────────────────────

/// Day-badge thresholds (percentages).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BadgeThresholds {
    pub perfect_tir: f64,
    pub stable_tir: f64,
    pub zen_cv: f64,
    pub steady_cv: f64,
}

impl Default for BadgeThresholds {
    fn default() -> Self {
        Self {
            perfect_tir: 99.0,
            stable_tir: 95.0,
            zen_cv: 30.0,
            steady_cv: 36.0,
        }
    }
}

// ── EngineConfig ──────────────────────────────────────────────────────────────

/// Immutable configuration bound to the engine at construction.
///
/// `Default` yields the production constants. Every field is optional when
/// deserialising, so a JSON override only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub glucose: GlucoseThresholds,
    pub agp: AgpConfig,
    pub episodes: EpisodeConfig,
    /// Fraction of bins a day must cover to take part in MODD.
    pub modd_coverage_threshold: f64,
    pub time_split: TimeSplit,
    pub parser: ParserConfig,
    pub sensor: SensorConfig,
    pub badges: BadgeThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            glucose: GlucoseThresholds::default(),
            agp: AgpConfig::default(),
            episodes: EpisodeConfig::default(),
            modd_coverage_threshold: 0.7,
            time_split: TimeSplit::default(),
            parser: ParserConfig::default(),
            sensor: SensorConfig::default(),
            badges: BadgeThresholds::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON document and validate the result.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Minimum number of filled bins for a day to qualify for MODD.
    pub fn modd_min_bins(&self) -> usize {
        (self.modd_coverage_threshold * self.agp.bins as f64).round() as usize
    }

    /// Reject internally inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        let g = &self.glucose;
        if !(g.min_valid < g.critical_low
            && g.critical_low <= g.low
            && g.low < g.high
            && g.high <= g.critical_high
            && g.critical_high < g.max_valid)
        {
            return Err(GlucoseError::Config(format!(
                "glucose thresholds must be ordered: {} < {} <= {} < {} <= {} < {}",
                g.min_valid, g.critical_low, g.low, g.high, g.critical_high, g.max_valid
            )));
        }
        if self.agp.bins == 0 || 1440 % self.agp.bins != 0 {
            return Err(GlucoseError::Config(format!(
                "agp.bins must divide 1440 evenly, got {}",
                self.agp.bins
            )));
        }
        if !(0.0..=1.0).contains(&self.modd_coverage_threshold) {
            return Err(GlucoseError::Config(format!(
                "modd_coverage_threshold must be within [0, 1], got {}",
                self.modd_coverage_threshold
            )));
        }
        let t = &self.time_split;
        if t.night_end > 24 || t.day_end > 24 || t.night_start > 23 || t.day_start > 23 {
            return Err(GlucoseError::Config(
                "time_split hours must be within 0..=24".to_string(),
            ));
        }
        let s = &self.sensor;
        if s.gap_min_minutes <= 0 || s.gap_min_minutes >= s.gap_max_minutes {
            return Err(GlucoseError::Config(format!(
                "sensor gap window must satisfy 0 < min < max, got {}..{}",
                s.gap_min_minutes, s.gap_max_minutes
            )));
        }
        if s.cluster_window_minutes < 0 {
            return Err(GlucoseError::Config(
                "sensor.cluster_window_minutes must not be negative".to_string(),
            ));
        }
        if s.match_window_hours < 0 || s.end_of_life_gap_minutes <= 0 {
            return Err(GlucoseError::Config(format!(
                "sensor lifecycle settings out of range: match_window_hours {}, end_of_life_gap_minutes {}",
                s.match_window_hours, s.end_of_life_gap_minutes
            )));
        }
        if s.change_alerts.iter().all(|a| a.trim().is_empty()) {
            return Err(GlucoseError::Config(
                "sensor.change_alerts must contain at least one phrase".to_string(),
            ));
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
