use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{EngineConfig, GlucoseThresholds};
use crate::formatting::percentage;
use crate::models::{DataQuality, MetricsResult, Reading};
use crate::time_utils::{bin_index, DateWindow, TimeFilter};

const SLOW_CALCULATION: Duration = Duration::from_secs(1);

/// Slack applied when comparing an excursion amplitude against the SD.
const AMPLITUDE_TOLERANCE: f64 = 1e-9;

// ── Options ───────────────────────────────────────────────────────────────────

/// Restricts readings to (or, inverted, away from) a set of calendar dates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateFilter {
    pub dates: BTreeSet<NaiveDate>,
    /// Exclude `dates` instead of keeping only them.
    #[serde(default)]
    pub invert: bool,
}

impl DateFilter {
    /// Keep only readings on `dates`.
    pub fn only(dates: BTreeSet<NaiveDate>) -> Self {
        Self {
            dates,
            invert: false,
        }
    }

    /// Drop readings on `dates`.
    pub fn excluding(dates: BTreeSet<NaiveDate>) -> Self {
        Self { dates, invert: true }
    }

    pub fn matches(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date) != self.invert
    }
}

/// Optional filters applied before any formula. Both are independent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsOptions {
    #[serde(default)]
    pub time_filter: Option<TimeFilter>,
    #[serde(default)]
    pub date_filter: Option<DateFilter>,
}

impl MetricsOptions {
    pub fn with_time_filter(mut self, filter: TimeFilter) -> Self {
        self.time_filter = Some(filter);
        self
    }

    pub fn with_date_filter(mut self, filter: DateFilter) -> Self {
        self.date_filter = Some(filter);
        self
    }

    fn accepts(&self, ts: NaiveDateTime, config: &EngineConfig) -> bool {
        if let Some(tf) = &self.time_filter {
            if !tf.matches(ts, &config.time_split) {
                return false;
            }
        }
        match &self.date_filter {
            Some(df) => df.matches(ts.date()),
            None => true,
        }
    }
}

// ── Sample selection ──────────────────────────────────────────────────────────

/// Chronological `(timestamp, glucose)` pairs of the readings inside `window`.
///
/// Event-only rows are skipped. The sort is stable, so readings sharing a
/// timestamp keep their input order.
pub fn glucose_samples(readings: &[Reading], window: DateWindow) -> Vec<(NaiveDateTime, f64)> {
    let mut samples: Vec<(NaiveDateTime, f64)> = readings
        .iter()
        .filter(|r| window.contains(r.timestamp))
        .filter_map(|r| r.glucose_mg_dl.map(|g| (r.timestamp, g)))
        .collect();
    samples.sort_by_key(|(ts, _)| *ts);
    samples
}

// ── Basic statistics ──────────────────────────────────────────────────────────

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n − 1). NaN for fewer than two values.
pub fn sample_sd(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (n - 1) as f64).sqrt()
}

/// Glucose Management Indicator (estimated HbA1c, %) from a mean in mg/dL.
pub fn gmi(mean_mg_dl: f64) -> f64 {
    3.31 + 0.02392 * mean_mg_dl
}

/// Percentages of readings in each clinical range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeBreakdown {
    pub very_low: f64,
    pub low: f64,
    pub in_range: f64,
    pub high: f64,
    pub very_high: f64,
}

impl RangeBreakdown {
    pub fn from_values(values: &[f64], t: &GlucoseThresholds) -> Self {
        let mut counts = [0usize; 5];
        for &v in values {
            let slot = if v < t.critical_low {
                0
            } else if v < t.low {
                1
            } else if v <= t.high {
                2
            } else if v <= t.critical_high {
                3
            } else {
                4
            };
            counts[slot] += 1;
        }
        let n = values.len();
        Self {
            very_low: percentage(counts[0], n),
            low: percentage(counts[1], n),
            in_range: percentage(counts[2], n),
            high: percentage(counts[3], n),
            very_high: percentage(counts[4], n),
        }
    }

    pub fn tbr(&self) -> f64 {
        self.very_low + self.low
    }

    pub fn tar(&self) -> f64 {
        self.high + self.very_high
    }

    /// Glycemia Risk Index.
    pub fn gri(&self) -> f64 {
        3.0 * self.very_low + 2.4 * self.low + 1.6 * self.very_high + 0.8 * self.high
    }
}

// ── MAGE ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Extremum {
    Peak(f64),
    Valley(f64),
}

/// Excursion tracker. Holds the last turning point and waits for one of the
/// opposite kind that is at least one SD away.
#[derive(Debug, Clone, Copy)]
enum ExcursionState {
    SeekingPeak { valley: f64 },
    SeekingValley { peak: f64 },
}

impl ExcursionState {
    fn start(first: Extremum) -> Self {
        match first {
            Extremum::Peak(p) => ExcursionState::SeekingValley { peak: p },
            Extremum::Valley(v) => ExcursionState::SeekingPeak { valley: v },
        }
    }

    /// Feed the next extremum; returns the amplitude when an excursion is
    /// accepted.
    fn step(&mut self, next: Extremum, sd: f64) -> Option<f64> {
        match (*self, next) {
            (ExcursionState::SeekingPeak { valley }, Extremum::Valley(v)) => {
                if v < valley {
                    *self = ExcursionState::SeekingPeak { valley: v };
                }
                None
            }
            (ExcursionState::SeekingValley { peak }, Extremum::Peak(p)) => {
                if p > peak {
                    *self = ExcursionState::SeekingValley { peak: p };
                }
                None
            }
            (ExcursionState::SeekingPeak { valley }, Extremum::Peak(p)) => {
                let amplitude = p - valley;
                if amplitude + AMPLITUDE_TOLERANCE >= sd {
                    *self = ExcursionState::SeekingValley { peak: p };
                    Some(amplitude)
                } else {
                    None
                }
            }
            (ExcursionState::SeekingValley { peak }, Extremum::Valley(v)) => {
                let amplitude = peak - v;
                if amplitude + AMPLITUDE_TOLERANCE >= sd {
                    *self = ExcursionState::SeekingPeak { valley: v };
                    Some(amplitude)
                } else {
                    None
                }
            }
        }
    }
}

/// Strict interior turning points after collapsing runs of equal values.
fn turning_points(values: &[f64]) -> Vec<Extremum> {
    let mut collapsed: Vec<f64> = Vec::with_capacity(values.len());
    for &v in values {
        if collapsed.last() != Some(&v) {
            collapsed.push(v);
        }
    }
    collapsed
        .windows(3)
        .filter_map(|w| {
            if w[1] > w[0] && w[1] > w[2] {
                Some(Extremum::Peak(w[1]))
            } else if w[1] < w[0] && w[1] < w[2] {
                Some(Extremum::Valley(w[1]))
            } else {
                None
            }
        })
        .collect()
}

/// Accepted excursion amplitudes of one chronological series.
fn excursions(values: &[f64], sd: f64) -> Vec<f64> {
    let points = turning_points(values);
    let mut iter = points.into_iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };
    let mut state = ExcursionState::start(first);
    iter.filter_map(|p| state.step(p, sd)).collect()
}

/// Mean Amplitude of Glycemic Excursions.
///
/// Each calendar day is scanned separately against the SD of the whole
/// series; the result is the mean of the per-day means over days with at
/// least one excursion, or 0 when there are none.
pub fn calculate_mage(samples: &[(NaiveDateTime, f64)], sd: f64) -> f64 {
    if !sd.is_finite() || sd <= 0.0 {
        return 0.0;
    }
    let mut by_day: BTreeMap<NaiveDate, Vec<(NaiveDateTime, f64)>> = BTreeMap::new();
    for &(ts, g) in samples {
        by_day.entry(ts.date()).or_default().push((ts, g));
    }
    let day_means: Vec<f64> = by_day
        .values_mut()
        .filter_map(|day| {
            day.sort_by_key(|(ts, _)| *ts);
            let values: Vec<f64> = day.iter().map(|(_, g)| *g).collect();
            let amps = excursions(&values, sd);
            if amps.is_empty() {
                None
            } else {
                Some(mean(&amps))
            }
        })
        .collect();
    if day_means.is_empty() {
        0.0
    } else {
        mean(&day_means)
    }
}

// ── MODD ──────────────────────────────────────────────────────────────────────

/// Mean Of Daily Differences.
///
/// Each date with enough filled bins is compared bin-by-bin with the
/// immediately preceding calendar date, when that date also qualifies.
pub fn calculate_modd(samples: &[(NaiveDateTime, f64)], config: &EngineConfig) -> f64 {
    let bin_minutes = config.agp.bin_minutes();
    let mut sums: BTreeMap<NaiveDate, BTreeMap<usize, (f64, usize)>> = BTreeMap::new();
    for (ts, g) in samples {
        let bin = sums
            .entry(ts.date())
            .or_default()
            .entry(bin_index(*ts, bin_minutes))
            .or_insert((0.0, 0));
        bin.0 += g;
        bin.1 += 1;
    }

    let min_bins = config.modd_min_bins();
    let daily: BTreeMap<NaiveDate, BTreeMap<usize, f64>> = sums
        .into_iter()
        .filter(|(_, bins)| bins.len() >= min_bins)
        .map(|(date, bins)| {
            let means = bins
                .into_iter()
                .map(|(bin, (sum, n))| (bin, sum / n as f64))
                .collect();
            (date, means)
        })
        .collect();

    let mut total = 0.0;
    let mut matched = 0usize;
    for (date, bins) in &daily {
        let Some(previous) = date.pred_opt().and_then(|d| daily.get(&d)) else {
            continue;
        };
        for (bin, value) in bins {
            if let Some(prev_value) = previous.get(bin) {
                total += (value - prev_value).abs();
                matched += 1;
            }
        }
    }

    if matched == 0 {
        0.0
    } else {
        total / matched as f64
    }
}

// ── Data quality ──────────────────────────────────────────────────────────────

fn data_quality(samples: &[(NaiveDateTime, f64)], bins_per_day: usize) -> DataQuality {
    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for (ts, _) in samples {
        *per_day.entry(ts.date()).or_default() += 1;
    }
    let total_days = per_day.len();
    let expected = total_days * bins_per_day;
    let actual = samples.len();
    let uptime = percentage(actual, expected).min(100.0);
    DataQuality {
        uptime_percent: uptime,
        missing_percent: 100.0 - uptime,
        complete_days: per_day.values().filter(|&&n| n >= bins_per_day).count(),
        total_days,
        expected_readings: expected,
        actual_readings: actual,
    }
}

// ── calculate_metrics ─────────────────────────────────────────────────────────

/// Summary statistics for the glucose readings in `window` that pass
/// `options`.
///
/// Returns `None` when no reading with a glucose value remains.
pub fn calculate_metrics(
    readings: &[Reading],
    window: DateWindow,
    options: &MetricsOptions,
    config: &EngineConfig,
) -> Option<MetricsResult> {
    let started = Instant::now();

    let samples: Vec<(NaiveDateTime, f64)> = glucose_samples(readings, window)
        .into_iter()
        .filter(|(ts, _)| options.accepts(*ts, config))
        .collect();
    if samples.is_empty() {
        debug!(
            "no glucose readings between {} and {}",
            window.start, window.end
        );
        return None;
    }

    let values: Vec<f64> = samples.iter().map(|(_, g)| *g).collect();
    let mean_value = mean(&values);
    let sd = sample_sd(&values);
    let cv = 100.0 * sd / mean_value;
    let ranges = RangeBreakdown::from_values(&values, &config.glucose);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mage = calculate_mage(&samples, sd);
    let modd = calculate_modd(&samples, config);
    let quality = data_quality(&samples, config.agp.bins);

    let result = MetricsResult {
        mean: mean_value,
        sd,
        cv,
        tir: ranges.in_range,
        tar: ranges.tar(),
        tbr: ranges.tbr(),
        tbr_very_low: ranges.very_low,
        tbr_low: ranges.low,
        tar_high: ranges.high,
        tar_very_high: ranges.very_high,
        gmi: gmi(mean_value),
        gri: ranges.gri(),
        mage,
        modd,
        min,
        max,
        reading_count: values.len(),
        days: quality.total_days,
        data_quality: quality,
    };

    let elapsed = started.elapsed();
    debug!(
        readings = result.reading_count,
        days = result.days,
        elapsed_ms = elapsed.as_millis() as u64,
        "metrics calculated"
    );
    if elapsed > SLOW_CALCULATION {
        warn!(
            "metrics calculation took {} ms for {} readings",
            elapsed.as_millis(),
            result.reading_count
        );
    }
    Some(result)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
