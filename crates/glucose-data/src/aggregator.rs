//! Time-of-day aggregation: the Ambulatory Glucose Profile and single-day
//! curves.

use chrono::NaiveDate;
use glucose_core::calculations::{glucose_samples, mean};
use glucose_core::config::EngineConfig;
use glucose_core::models::{AgpBin, CurvePoint, Reading};
use glucose_core::percentile::{percentile, sorted_values};
use glucose_core::time_utils::{bin_index, bin_label, DateWindow};
use tracing::{debug, warn};

/// Percentiles reported for every AGP bin.
pub const AGP_PERCENTILES: [f64; 5] = [5.0, 25.0, 50.0, 75.0, 95.0];

// ── AGP ───────────────────────────────────────────────────────────────────────

/// Pool the glucose readings in `window` by time of day, ignoring the date,
/// and summarise each bin.
///
/// Always returns `config.agp.bins` entries; a bin without readings reports
/// `None` for every statistic.
pub fn calculate_agp(readings: &[Reading], window: DateWindow, config: &EngineConfig) -> Vec<AgpBin> {
    let Some(last_bin) = config.agp.bins.checked_sub(1) else {
        warn!("agp.bins is 0; no profile built");
        return Vec::new();
    };
    let bin_minutes = config.agp.bin_minutes();
    let mut pooled: Vec<Vec<f64>> = vec![Vec::new(); config.agp.bins];
    for (ts, g) in glucose_samples(readings, window) {
        pooled[bin_index(ts, bin_minutes).min(last_bin)].push(g);
    }

    let method = config.agp.percentile_method;
    let bins: Vec<AgpBin> = pooled
        .into_iter()
        .enumerate()
        .map(|(bin_index, values)| {
            if values.is_empty() {
                return AgpBin::empty(bin_index);
            }
            let sorted = sorted_values(&values);
            let [p5, p25, p50, p75, p95] = AGP_PERCENTILES.map(|p| percentile(&sorted, p, method));
            AgpBin {
                bin_index,
                p5,
                p25,
                p50,
                p75,
                p95,
                mean: Some(mean(&sorted)),
                count: sorted.len(),
            }
        })
        .collect();

    debug!(
        "AGP built: {} of {} bins populated",
        bins.iter().filter(|b| b.has_data()).count(),
        bins.len()
    );
    bins
}

// ── Day curve ─────────────────────────────────────────────────────────────────

/// Glucose curve for one calendar day, one point per bin.
///
/// When several readings share a bin the latest one wins. Bins without a
/// reading are `None`, leaving a visible gap.
pub fn day_curve(readings: &[Reading], date: NaiveDate, config: &EngineConfig) -> Vec<CurvePoint> {
    let Some(last_bin) = config.agp.bins.checked_sub(1) else {
        return Vec::new();
    };
    let bin_minutes = config.agp.bin_minutes();
    let mut values: Vec<Option<f64>> = vec![None; config.agp.bins];
    for (ts, g) in glucose_samples(readings, DateWindow::single(date)) {
        values[bin_index(ts, bin_minutes).min(last_bin)] = Some(g);
    }
    values
        .into_iter()
        .enumerate()
        .map(|(bin_index, glucose)| CurvePoint {
            bin_index,
            time: bin_label(bin_index, bin_minutes),
            glucose,
        })
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────────────────────
