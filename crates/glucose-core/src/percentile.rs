use crate::config::PercentileMethod;

// ── Percentile helpers ────────────────────────────────────────────────────────

/// Nearest-rank percentile of a **sorted** slice: `sorted[floor(n * p / 100)]`,
/// clamped to the last element.
///
/// Returns `None` for an empty slice.
pub fn rank_percentile(sorted_data: &[f64], p: f64) -> Option<f64> {
    if sorted_data.is_empty() {
        return None;
    }
    let len = sorted_data.len();
    let idx = ((len as f64) * (p / 100.0)).floor() as usize;
    Some(sorted_data[idx.min(len - 1)])
}

/// Compute the `p`-th percentile of a **sorted** slice using standard linear
/// interpolation (the same algorithm used by NumPy's `percentile` function).
///
/// Returns `None` for an empty slice.
pub fn linear_percentile(sorted_data: &[f64], p: f64) -> Option<f64> {
    if sorted_data.is_empty() {
        return None;
    }
    let len = sorted_data.len();
    if len == 1 {
        return Some(sorted_data[0]);
    }
    let rank = (p / 100.0) * (len as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted_data[lo]);
    }
    let frac = rank - lo as f64;
    Some(sorted_data[lo] + frac * (sorted_data[hi] - sorted_data[lo]))
}

/// Dispatch to the configured percentile method.
pub fn percentile(sorted_data: &[f64], p: f64, method: PercentileMethod) -> Option<f64> {
    match method {
        PercentileMethod::Rank => rank_percentile(sorted_data, p),
        PercentileMethod::Linear => linear_percentile(sorted_data, p),
    }
}

/// Sort glucose values ascending. NaN never reaches here (the parser rejects
/// it), so `total_cmp` ordering matches numeric ordering.
pub fn sorted_values(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    v
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_empty_returns_none() {
        assert_eq!(rank_percentile(&[], 50.0), None);
    }

    #[test]
    fn test_rank_single_element() {
        assert_eq!(rank_percentile(&[42.0], 5.0), Some(42.0));
        assert_eq!(rank_percentile(&[42.0], 95.0), Some(42.0));
    }

    #[test]
    fn test_rank_twenty_elements() {
        let data: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        // floor(20 * 0.05) = 1 → data[1] = 2
        assert_eq!(rank_percentile(&data, 5.0), Some(2.0));
        // floor(20 * 0.5) = 10 → data[10] = 11
        assert_eq!(rank_percentile(&data, 50.0), Some(11.0));
        // floor(20 * 0.95) = 19 → data[19] = 20
        assert_eq!(rank_percentile(&data, 95.0), Some(20.0));
    }

    #[test]
    fn test_rank_p100_is_clamped() {
        let data = vec![10.0, 20.0, 30.0];
        assert_eq!(rank_percentile(&data, 100.0), Some(30.0));
    }

    #[test]
    fn test_linear_p50_even() {
        let data = vec![1.0, 2.0, 3.0, 4.0];
        // rank = 0.5 * 3 = 1.5 → interpolate between data[1]=2 and data[2]=3
        let p50 = linear_percentile(&data, 50.0).unwrap();
        assert!((p50 - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_linear_p90_ten_elements() {
        // 1..=10 sorted: rank = 0.9 * 9 = 8.1 → 9 + 0.1*(10-9) = 9.1
        let data: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let p90 = linear_percentile(&data, 90.0).unwrap();
        assert!((p90 - 9.1).abs() < 1e-9, "p90 = {p90}");
    }

    #[test]
    fn test_both_methods_are_monotone() {
        let data = sorted_values(&[140.0, 90.0, 210.0, 65.0, 180.0, 120.0, 300.0]);
        for method in [PercentileMethod::Rank, PercentileMethod::Linear] {
            let ps: Vec<f64> = [5.0, 25.0, 50.0, 75.0, 95.0]
                .iter()
                .map(|&p| percentile(&data, p, method).unwrap())
                .collect();
            assert!(ps.windows(2).all(|w| w[0] <= w[1]), "{method:?}: {ps:?}");
        }
    }

    #[test]
    fn test_sorted_values_orders_ascending() {
        assert_eq!(sorted_values(&[3.0, 1.0, 2.0]), vec![1.0, 2.0, 3.0]);
    }
}
