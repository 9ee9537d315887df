#![warn(missing_docs)]
//! Macrobench Stats - Score Aggregation
//!
//! Turns per-iteration scores into the numbers a result reports:
//! mean and spread, percentiles, and a bootstrap confidence interval whose
//! half-width becomes the score error.

mod bootstrap;
mod percentiles;
mod summary;

pub use bootstrap::{
    BootstrapConfig, BootstrapError, IntervalMethod, MIN_VALUES, ScoreInterval,
    bootstrap_interval, score_error,
};
pub use percentiles::{SCORE_PERCENTILES, compute_percentile, compute_percentiles};
pub use summary::{Summary, mean};

/// Below this many values the interval uses BCa.
pub const BCA_THRESHOLD: usize = 100;

/// Resampled means drawn per interval.
pub const DEFAULT_BOOTSTRAP_RESAMPLES: usize = 10_000;

/// Confidence level of the reported score error.
pub const SCORE_CONFIDENCE: f64 = 0.999;
