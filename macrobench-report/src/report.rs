//! Result Records

use macrobench_core::BenchConfiguration;
use macrobench_ipc::BenchMode;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Fixed key under which every record carries the submitted benchmark.
pub const BENCH_CONFIGURATION_KEY: &str = "benchConfiguration";

/// Unit scores are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Every unit, smallest first.
    pub const ALL: [TimeUnit; 7] = [
        TimeUnit::Nanoseconds,
        TimeUnit::Microseconds,
        TimeUnit::Milliseconds,
        TimeUnit::Seconds,
        TimeUnit::Minutes,
        TimeUnit::Hours,
        TimeUnit::Days,
    ];

    /// Name as accepted in options maps.
    pub fn name(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "NANOSECONDS",
            TimeUnit::Microseconds => "MICROSECONDS",
            TimeUnit::Milliseconds => "MILLISECONDS",
            TimeUnit::Seconds => "SECONDS",
            TimeUnit::Minutes => "MINUTES",
            TimeUnit::Hours => "HOURS",
            TimeUnit::Days => "DAYS",
        }
    }

    /// Abbreviation used inside score units.
    pub fn short(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "min",
            TimeUnit::Hours => "hr",
            TimeUnit::Days => "day",
        }
    }

    /// Length of one unit in nanoseconds.
    pub fn nanos(self) -> f64 {
        match self {
            TimeUnit::Nanoseconds => 1.0,
            TimeUnit::Microseconds => 1e3,
            TimeUnit::Milliseconds => 1e6,
            TimeUnit::Seconds => 1e9,
            TimeUnit::Minutes => 60e9,
            TimeUnit::Hours => 3_600e9,
            TimeUnit::Days => 86_400e9,
        }
    }

    /// Unit string of a primary score in `mode`.
    pub fn score_unit(self, mode: BenchMode) -> String {
        match mode {
            BenchMode::Throughput => format!("ops/{}", self.short()),
            _ => format!("{}/op", self.short()),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeUnit::ALL
            .into_iter()
            .find(|unit| unit.name() == s)
            .ok_or_else(|| format!("unknown time unit: {s}"))
    }
}

/// A primary or secondary metric aggregated over every measurement fork.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    /// Mean of the scores
    pub score: f64,
    /// Half-width of the confidence interval; absent below three iterations
    pub score_error: Option<f64>,
    /// Score minus and plus the error
    pub score_confidence: [f64; 2],
    /// Ordered (level, value) pairs, written as a JSON object
    #[serde(serialize_with = "serialize_percentiles")]
    pub score_percentiles: Vec<(f64, f64)>,
    /// Unit, e.g. `ops/s`
    pub score_unit: String,
    /// Iteration scores, one row per fork
    pub raw_data: Vec<Vec<f64>>,
}

fn serialize_percentiles<S: Serializer>(
    pairs: &[(f64, f64)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(pairs.len()))?;
    for (level, value) in pairs {
        map.serialize_entry(&format!("{level:?}"), value)?;
    }
    map.end()
}

fn serialize_mode<S: Serializer>(mode: &BenchMode, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(mode.label())
}

/// One benchmark mode's result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// Benchmark name
    pub benchmark: String,
    /// Mode this record measures
    #[serde(serialize_with = "serialize_mode")]
    pub mode: BenchMode,
    /// Measurement threads, always 1
    pub threads: u32,
    /// Measurement forks
    pub forks: u32,
    /// Discarded forks
    pub warmup_forks: u32,
    /// Warmup iterations per fork
    pub warmup_iterations: u32,
    /// Warmup iteration budget
    pub warmup_time: String,
    /// Invocations per warmup batch
    pub warmup_batch_size: u32,
    /// Measured iterations per fork
    pub measurement_iterations: u32,
    /// Measured iteration budget
    pub measurement_time: String,
    /// Invocations per measured batch
    pub measurement_batch_size: u32,
    /// Operations one invocation counts for
    pub operations_per_invocation: u32,
    /// Unit of time-based scores
    pub time_unit: TimeUnit,
    /// Extra worker flags
    pub launch_flags: Vec<String>,
    /// Enabled profilers
    pub profilers: Vec<String>,
    /// Score of the mode
    pub primary_metric: Metric,
    /// Profiler metrics by name
    pub secondary_metrics: BTreeMap<String, Metric>,
    /// The benchmark as submitted
    pub bench_configuration: BenchConfiguration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_unit_names() {
        for unit in TimeUnit::ALL {
            assert_eq!(unit.name().parse::<TimeUnit>(), Ok(unit));
        }
        assert!("seconds".parse::<TimeUnit>().is_err());
        assert_eq!(
            serde_json::to_string(&TimeUnit::Microseconds).unwrap(),
            "\"MICROSECONDS\""
        );
    }

    #[test]
    fn test_score_units() {
        assert_eq!(TimeUnit::Seconds.score_unit(BenchMode::Throughput), "ops/s");
        assert_eq!(TimeUnit::Nanoseconds.score_unit(BenchMode::AverageTime), "ns/op");
        assert_eq!(TimeUnit::Milliseconds.score_unit(BenchMode::SampleTime), "ms/op");
    }

    #[test]
    fn test_percentiles_keep_order() {
        let metric = Metric {
            score: 1.0,
            score_error: None,
            score_confidence: [1.0, 1.0],
            score_percentiles: vec![(0.0, 1.0), (99.99, 2.0), (100.0, 3.0)],
            score_unit: "ops/s".into(),
            raw_data: vec![vec![1.0]],
        };
        let json = serde_json::to_string(&metric).unwrap();
        assert!(json.contains(r#""scorePercentiles":{"0.0":1.0,"99.99":2.0,"100.0":3.0}"#));
        assert!(json.contains(r#""scoreError":null"#));
    }
}
