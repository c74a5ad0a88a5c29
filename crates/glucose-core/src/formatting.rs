/// Format a metric with a fixed number of decimal places.
///
/// Non-finite values (the NaN SD of a single reading, for instance) render
/// as `"N/A"`.
///
/// # Examples
///
/// ```
/// use glucose_core::formatting::format_metric;
///
/// assert_eq!(format_metric(154.0, 0), "154");
/// assert_eq!(format_metric(7.0936, 1), "7.1");
/// assert_eq!(format_metric(f64::NAN, 1), "N/A");
/// ```
pub fn format_metric(value: f64, decimals: u32) -> String {
    if !value.is_finite() {
        return "N/A".to_string();
    }
    let factor = 10_f64.powi(decimals as i32);
    // Nudge exact midpoints so 0.05 rounds up despite its binary form.
    let epsilon = f64::EPSILON * value.abs() * factor;
    let rounded = ((value * factor) + epsilon.copysign(value)).round() / factor;
    // Avoid rendering "-0.0".
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{:.prec$}", rounded, prec = decimals as usize)
}

/// Format a percentage with one decimal and a `%` suffix.
///
/// ```
/// use glucose_core::formatting::format_percent;
///
/// assert_eq!(format_percent(72.345), "72.3%");
/// assert_eq!(format_percent(f64::NAN), "N/A");
/// ```
pub fn format_percent(value: f64) -> String {
    if !value.is_finite() {
        return "N/A".to_string();
    }
    format!("{}%", format_metric(value, 1))
}

/// Format a glucose value in mg/dL, or `"N/A"` when absent.
pub fn format_glucose(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{} mg/dL", format_metric(v, 0)),
        None => "N/A".to_string(),
    }
}

/// Format a duration in minutes as a human-readable string.
///
/// * `< 60` minutes → `"45m"`
/// * `≥ 60` minutes, no remainder → `"3h"`
/// * `≥ 60` minutes, with remainder → `"3h 45m"`
///
/// ```
/// use glucose_core::formatting::format_duration;
///
/// assert_eq!(format_duration(15), "15m");
/// assert_eq!(format_duration(120), "2h");
/// assert_eq!(format_duration(135), "2h 15m");
/// ```
pub fn format_duration(minutes: i64) -> String {
    if minutes < 60 {
        format!("{}m", minutes)
    } else {
        let hours = minutes / 60;
        let mins = minutes % 60;
        if mins == 0 {
            format!("{}h", hours)
        } else {
            format!("{}h {}m", hours, mins)
        }
    }
}

/// Calculate `(part / whole) * 100` without rounding.
///
/// Returns `0.0` if `whole` is zero.
pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

// ── Tests ──────────────────────────────────────────────────────────────────────
