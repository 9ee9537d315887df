//! Percentiles over raw values
//!
//! Computed on everything that was measured; the tail is the signal.

/// Percentile levels reported for every score, in output order.
pub const SCORE_PERCENTILES: [f64; 8] = [0.0, 50.0, 90.0, 95.0, 99.0, 99.9, 99.99, 100.0];

/// One percentile, linearly interpolated between nearest ranks.
/// Returns zero for an empty slice.
pub fn compute_percentile(values: &[f64], percentile: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_of_sorted(&sorted, percentile)
}

/// Every level in `levels`, sorting once.
pub fn compute_percentiles(values: &[f64], levels: &[f64]) -> Vec<(f64, f64)> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    levels
        .iter()
        .map(|level| (*level, percentile_of_sorted(&sorted, *level)))
        .collect()
}

fn percentile_of_sorted(sorted: &[f64], percentile: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (percentile / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = (lower + 1).min(n - 1);
            sorted[lower] + (rank - lower as f64) * (sorted[upper] - sorted[lower])
        }
    }
}
