//! Hypo- and hyperglycaemic episode detection.
//!
//! A single chronological pass keeps at most one open hypo run and one open
//! hyper run. A run closes on the first reading back across its threshold
//! and is kept only when it lasted long enough.

use chrono::NaiveDateTime;
use glucose_core::calculations::glucose_samples;
use glucose_core::config::EngineConfig;
use glucose_core::models::{Episode, EpisodeKind, EpisodeSet, Reading, Severity};
use glucose_core::time_utils::{minute_of_day, minutes_between, DateWindow};
use tracing::debug;

// ── OpenRun ───────────────────────────────────────────────────────────────────

/// An out-of-range run that has not closed yet.
#[derive(Debug, Clone, Copy)]
struct OpenRun {
    start: NaiveDateTime,
    start_glucose: f64,
    /// Nadir for hypo runs, peak for hyper runs.
    extreme: f64,
}

impl OpenRun {
    fn open(start: NaiveDateTime, glucose: f64) -> Self {
        Self {
            start,
            start_glucose: glucose,
            extreme: glucose,
        }
    }

    fn close(self, kind: EpisodeKind, end: NaiveDateTime, severity: Severity) -> Episode {
        Episode {
            kind,
            start: self.start,
            end,
            start_glucose: self.start_glucose,
            extreme: self.extreme,
            severity,
            duration_minutes: minutes_between(self.start, end).round() as i64,
            minute_of_day: minute_of_day(self.start),
        }
    }
}

// ── detect_events ─────────────────────────────────────────────────────────────

/// Detect hypo and hyper episodes among the glucose readings in `window`.
///
/// * Hypo: opens below `glucose.low`, closes at the first reading at or
///   above it, kept when at least `episodes.hypo_min_duration` minutes long.
///   `Severe` when the nadir is below `glucose.critical_low`.
/// * Hyper: opens above `episodes.hyper_threshold`, closes at the first
///   reading at or below it, kept when at least
///   `episodes.hyper_min_duration` minutes long.
///
/// Runs still open at the last reading are not reported.
pub fn detect_events(readings: &[Reading], window: DateWindow, config: &EngineConfig) -> EpisodeSet {
    let hypo_threshold = config.glucose.low;
    let severe_threshold = config.glucose.critical_low;
    let hyper_threshold = config.episodes.hyper_threshold;

    let mut set = EpisodeSet::default();
    let mut hypo: Option<OpenRun> = None;
    let mut hyper: Option<OpenRun> = None;

    for (ts, g) in glucose_samples(readings, window) {
        if g < hypo_threshold {
            match hypo.as_mut() {
                Some(run) => run.extreme = run.extreme.min(g),
                None => hypo = Some(OpenRun::open(ts, g)),
            }
        } else if let Some(run) = hypo.take() {
            let severity = if run.extreme < severe_threshold {
                Severity::Severe
            } else {
                Severity::Low
            };
            let episode = run.close(EpisodeKind::Hypo, ts, severity);
            if episode.duration_minutes >= config.episodes.hypo_min_duration {
                set.hypo_episodes.push(episode);
            }
        }

        if g > hyper_threshold {
            match hyper.as_mut() {
                Some(run) => run.extreme = run.extreme.max(g),
                None => hyper = Some(OpenRun::open(ts, g)),
            }
        } else if let Some(run) = hyper.take() {
            let episode = run.close(EpisodeKind::Hyper, ts, Severity::High);
            if episode.duration_minutes >= config.episodes.hyper_min_duration {
                set.hyper_episodes.push(episode);
            }
        }
    }

    if hypo.is_some() || hyper.is_some() {
        debug!("dropping episode still open at the end of the window");
    }
    debug!(
        "Detected {} hypo and {} hyper episodes",
        set.hypo_episodes.len(),
        set.hyper_episodes.len()
    );
    set
}

// ── Tests ──────────────────────────────────────────────────────────────────────
