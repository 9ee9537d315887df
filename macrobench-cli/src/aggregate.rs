//! Score Aggregation
//!
//! Turns the measurement iterations of every fork into one [`RunResult`] per
//! mode. Modes are independent, so they are aggregated in parallel with Rayon.

use crate::options::{RunSpec, format_duration};
use macrobench_core::BenchConfiguration;
use macrobench_ipc::{BenchMode, IterationPhase, IterationResult};
use macrobench_report::{Metric, RunResult, TimeUnit};
use macrobench_stats::{SCORE_PERCENTILES, Summary, compute_percentiles, score_error};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Name every result is reported under.
pub const BENCHMARK_NAME: &str = "macro";

/// Score of one iteration in `unit`.
pub fn iteration_score(iteration: &IterationResult, unit: TimeUnit) -> f64 {
    let ops = iteration.operations.max(1) as f64;
    let elapsed = iteration.timed_nanos.max(1) as f64 / unit.nanos();
    match iteration.mode {
        BenchMode::Throughput => ops / elapsed,
        BenchMode::AverageTime | BenchMode::SingleShotTime => elapsed / ops,
        BenchMode::SampleTime => {
            let samples = per_op_samples(iteration, unit);
            if samples.is_empty() {
                elapsed / ops
            } else {
                samples.iter().sum::<f64>() / samples.len() as f64
            }
        }
    }
}

/// SampleTime batches converted to time per operation in `unit`.
fn per_op_samples(iteration: &IterationResult, unit: TimeUnit) -> Vec<f64> {
    let ops_per_invocation = iteration.operations as f64 / iteration.invocations.max(1) as f64;
    let ops_per_batch = (iteration.batch_size.max(1) as f64 * ops_per_invocation).max(1.0);
    iteration
        .samples
        .iter()
        .map(|nanos| *nanos as f64 / unit.nanos() / ops_per_batch)
        .collect()
}

fn metric(rows: Vec<Vec<f64>>, distribution: &[f64], score: f64, unit: String) -> Metric {
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    let error = score_error(&flat);
    let half = error.unwrap_or(0.0);
    Metric {
        score,
        score_error: error,
        score_confidence: [score - half, score + half],
        score_percentiles: compute_percentiles(distribution, &SCORE_PERCENTILES),
        score_unit: unit,
        raw_data: rows,
    }
}

fn aggregate_mode(
    mode: BenchMode,
    forks: &[Vec<IterationResult>],
    spec: &RunSpec,
    bench: &BenchConfiguration,
) -> RunResult {
    let unit = spec.time_unit();
    let per_fork: Vec<Vec<&IterationResult>> = forks
        .iter()
        .map(|fork| {
            let mut measured: Vec<&IterationResult> = fork
                .iter()
                .filter(|it| it.mode == mode && it.phase == IterationPhase::Measurement)
                .collect();
            measured.sort_by_key(|it| it.index);
            measured
        })
        .collect();

    let rows: Vec<Vec<f64>> = per_fork
        .iter()
        .map(|fork| fork.iter().map(|it| iteration_score(it, unit)).collect())
        .collect();
    let scores: Vec<f64> = rows.iter().flatten().copied().collect();

    let primary = if mode == BenchMode::SampleTime {
        let samples: Vec<f64> = per_fork
            .iter()
            .flatten()
            .flat_map(|it| per_op_samples(it, unit))
            .collect();
        let score = if samples.is_empty() {
            Summary::of(&scores).mean
        } else {
            Summary::of(&samples).mean
        };
        let distribution = if samples.is_empty() { &scores } else { &samples };
        metric(rows, distribution, score, unit.score_unit(mode))
    } else {
        let score = Summary::of(&scores).mean;
        metric(rows, &scores, score, unit.score_unit(mode))
    };

    // name -> (unit, per-fork values)
    let mut grouped: BTreeMap<String, (String, Vec<Vec<f64>>)> = BTreeMap::new();
    for (fork_idx, fork) in per_fork.iter().enumerate() {
        for iteration in fork {
            for secondary in &iteration.secondary {
                let entry = grouped
                    .entry(secondary.name.clone())
                    .or_insert_with(|| (secondary.unit.clone(), vec![Vec::new(); per_fork.len()]));
                entry.1[fork_idx].push(secondary.value);
            }
        }
    }
    let secondary_metrics = grouped
        .into_iter()
        .map(|(name, (unit, rows))| {
            let values: Vec<f64> = rows.iter().flatten().copied().collect();
            let score = Summary::of(&values).mean;
            (name, metric(rows, &values, score, unit))
        })
        .collect();

    RunResult {
        benchmark: BENCHMARK_NAME.to_string(),
        mode,
        threads: spec.threads(),
        forks: spec.forks(),
        warmup_forks: spec.warmup_forks(),
        warmup_iterations: spec.warmup_iterations(),
        warmup_time: format_duration(spec.warmup_time()),
        warmup_batch_size: spec.warmup_batch_size(),
        measurement_iterations: spec.measurement_iterations(),
        measurement_time: format_duration(spec.measurement_time()),
        measurement_batch_size: spec.measurement_batch_size(),
        operations_per_invocation: spec.operations_per_invocation(),
        time_unit: unit,
        launch_flags: spec.launch_flags(),
        profilers: spec.profilers().to_vec(),
        primary_metric: primary,
        secondary_metrics,
        bench_configuration: bench.clone(),
    }
}

/// One result per requested mode, in mode order. `forks` holds every
/// iteration each measurement fork reported; warmup iterations are ignored.
pub fn aggregate(
    forks: &[Vec<IterationResult>],
    spec: &RunSpec,
    bench: &BenchConfiguration,
) -> Vec<RunResult> {
    spec.mode()
        .concrete_modes()
        .into_par_iter()
        .map(|mode| aggregate_mode(mode, forks, spec, bench))
        .collect()
}
