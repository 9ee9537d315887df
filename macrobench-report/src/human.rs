//! Human-readable terminal output

use crate::report::{Metric, RunResult};
use macrobench_ipc::BenchMode;
use std::fmt::Write;

/// Format results for terminal display: one block per result, with
/// percentiles for SampleTime and any secondary metrics.
pub fn format_human_output(results: &[RunResult]) -> String {
    let mut output = String::new();

    output.push('\n');
    output.push_str("Macrobench Results\n");
    output.push_str(&"=".repeat(60));
    output.push_str("\n\n");

    if results.is_empty() {
        output.push_str("  (no results)\n");
        return output;
    }

    for result in results {
        let _ = writeln!(
            output,
            "{} [{}]  forks: {}  iterations: {} x {}",
            result.benchmark,
            result.mode.label(),
            result.forks,
            result.measurement_iterations,
            result.measurement_time,
        );
        output.push_str(&"-".repeat(60));
        output.push('\n');

        let primary = &result.primary_metric;
        let _ = writeln!(output, "  score: {}", score_line(primary));
        if primary.score_error.is_some() {
            let _ = writeln!(
                output,
                "  99.9% CI: [{:.3}, {:.3}] {}",
                primary.score_confidence[0], primary.score_confidence[1], primary.score_unit
            );
        }

        if result.mode == BenchMode::SampleTime {
            output.push_str("  percentiles:\n");
            for (level, value) in &primary.score_percentiles {
                let _ = writeln!(output, "    p{:<8} {:>14.3} {}", format!("{level:?}"), value, primary.score_unit);
            }
        }

        for (name, metric) in &result.secondary_metrics {
            let _ = writeln!(output, "  {name}: {}", score_line(metric));
        }
        output.push('\n');
    }

    output
}

fn score_line(metric: &Metric) -> String {
    match metric.score_error {
        Some(error) => format!("{:.3} ± {:.3} {}", metric.score, error, metric.score_unit),
        None => format!("{:.3} {}", metric.score, metric.score_unit),
    }
}
