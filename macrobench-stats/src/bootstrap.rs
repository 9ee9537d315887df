//! Bootstrap confidence intervals for a score
//!
//! Iteration scores are few (one per measured iteration per fork), so the
//! interval uses bias-corrected and accelerated percentiles below
//! [`BCA_THRESHOLD`] values and plain percentiles above it.

use crate::summary::mean;
use crate::{BCA_THRESHOLD, DEFAULT_BOOTSTRAP_RESAMPLES, SCORE_CONFIDENCE};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use thiserror::Error;

/// Minimum number of values an interval is computed for.
pub const MIN_VALUES: usize = 3;

/// Resampling settings.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Number of resampled means
    pub resamples: usize,
    /// Two-sided confidence level in (0, 1)
    pub confidence: f64,
    /// Seed for reproducible intervals; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            resamples: DEFAULT_BOOTSTRAP_RESAMPLES,
            confidence: SCORE_CONFIDENCE,
            seed: None,
        }
    }
}

/// How the interval bounds were picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalMethod {
    /// No spread in the input; the interval collapses onto the mean
    Degenerate,
    /// Plain percentiles of the resampled means
    Percentile,
    /// Bias-corrected and accelerated percentiles
    Bca,
}

/// A confidence interval around a mean.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInterval {
    /// Mean of the input values
    pub mean: f64,
    /// Lower bound
    pub lower: f64,
    /// Upper bound
    pub upper: f64,
    /// Confidence level the bounds were computed for
    pub confidence: f64,
    /// How the bounds were picked
    pub method: IntervalMethod,
}

impl ScoreInterval {
    /// Largest distance from the mean to either bound.
    pub fn half_width(&self) -> f64 {
        (self.mean - self.lower).max(self.upper - self.mean)
    }
}

/// Why no interval could be computed.
#[derive(Debug, Error, PartialEq)]
pub enum BootstrapError {
    /// Fewer values than a bootstrap needs
    #[error("not enough values: got {got}, need at least {MIN_VALUES}")]
    NotEnoughValues {
        /// Number of values supplied
        got: usize,
    },

    /// Confidence level outside (0, 1)
    #[error("invalid confidence level {0}, must lie strictly between 0 and 1")]
    InvalidConfidence(f64),

    /// Zero resamples requested
    #[error("resample count must be positive")]
    NoResamples,
}

/// Confidence interval for the mean of `values`.
pub fn bootstrap_interval(
    values: &[f64],
    config: &BootstrapConfig,
) -> Result<ScoreInterval, BootstrapError> {
    if values.len() < MIN_VALUES {
        return Err(BootstrapError::NotEnoughValues { got: values.len() });
    }
    if !(config.confidence > 0.0 && config.confidence < 1.0) {
        return Err(BootstrapError::InvalidConfidence(config.confidence));
    }
    if config.resamples == 0 {
        return Err(BootstrapError::NoResamples);
    }

    let center = mean(values);
    if values.iter().all(|v| *v == values[0]) {
        return Ok(ScoreInterval {
            mean: center,
            lower: center,
            upper: center,
            confidence: config.confidence,
            method: IntervalMethod::Degenerate,
        });
    }

    let mut means = resample_means(values, config.resamples, config.seed);
    means.sort_by(f64::total_cmp);

    let alpha = (1.0 - config.confidence) / 2.0;
    let (lo, hi, method) = if values.len() < BCA_THRESHOLD {
        let (lo, hi) = bca_levels(values, &means, center, alpha);
        (lo, hi, IntervalMethod::Bca)
    } else {
        (alpha, 1.0 - alpha, IntervalMethod::Percentile)
    };

    Ok(ScoreInterval {
        mean: center,
        lower: quantile_of_sorted(&means, lo),
        upper: quantile_of_sorted(&means, hi),
        confidence: config.confidence,
        method,
    })
}

/// Half-width of the default interval, or `None` when there are too few
/// values to say anything.
pub fn score_error(values: &[f64]) -> Option<f64> {
    bootstrap_interval(values, &BootstrapConfig::default())
        .ok()
        .map(|interval| interval.half_width())
}

fn resample_means(values: &[f64], resamples: usize, seed: Option<u64>) -> Vec<f64> {
    let n = values.len();
    let draw = |rng: &mut StdRng| {
        let mut sum = 0.0;
        for _ in 0..n {
            sum += values[rng.gen_range(0..n)];
        }
        sum / n as f64
    };
    match seed {
        // Per-index seeding keeps seeded runs identical regardless of how
        // rayon splits the range.
        Some(seed) => (0..resamples)
            .into_par_iter()
            .map(|i| draw(&mut StdRng::seed_from_u64(seed ^ (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))))
            .collect(),
        None => (0..resamples)
            .into_par_iter()
            .map_init(StdRng::from_entropy, |rng, _| draw(rng))
            .collect(),
    }
}

fn quantile_of_sorted(sorted: &[f64], level: f64) -> f64 {
    let last = sorted.len() - 1;
    let idx = ((level * sorted.len() as f64).floor() as usize).min(last);
    sorted[idx]
}

/// Adjusted lower and upper levels for the BCa interval.
fn bca_levels(values: &[f64], sorted_means: &[f64], center: f64, alpha: f64) -> (f64, f64) {
    let below = sorted_means.partition_point(|m| *m < center);
    let z0 = normal_quantile((below as f64 / sorted_means.len() as f64).clamp(1e-4, 1.0 - 1e-4));

    // Jackknife acceleration
    let n = values.len() as f64;
    let total: f64 = values.iter().sum();
    let leave_one_out: Vec<f64> = values.iter().map(|v| (total - v) / (n - 1.0)).collect();
    let jack_mean = mean(&leave_one_out);
    let (num, den) = leave_one_out.iter().fold((0.0, 0.0), |(num, den), m| {
        let d = jack_mean - m;
        (num + d.powi(3), den + d.powi(2))
    });
    let accel = if den.abs() < 1e-12 {
        0.0
    } else {
        num / (6.0 * den.powf(1.5))
    };

    let adjust = |z: f64| normal_cdf(z0 + (z0 + z) / (1.0 - accel * (z0 + z)));
    (
        adjust(normal_quantile(alpha)),
        adjust(normal_quantile(1.0 - alpha)),
    )
}

/// Inverse standard normal CDF (Abramowitz and Stegun 26.2.23).
fn normal_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    let (sign, tail) = if p < 0.5 { (-1.0, p) } else { (1.0, 1.0 - p) };
    let t = (-2.0 * tail.ln()).sqrt();
    let num = 2.515517 + 0.802853 * t + 0.010328 * t * t;
    let den = 1.0 + 1.432788 * t + 0.189269 * t * t + 0.001308 * t * t * t;
    sign * (t - num / den)
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Abramowitz and Stegun 7.1.26.
fn erf(x: f64) -> f64 {
    let sign = x.signum();
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = ((((1.061405429 * t - 1.453152027) * t + 1.421413741) * t - 0.284496736) * t
        + 0.254829592)
        * t;
    sign * (1.0 - poly * (-x * x).exp())
}
