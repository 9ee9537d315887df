//! Lifecycle Runner
//!
//! Drives one trial against an exclusively owned stack:
//!
//! ```text
//! TRIAL_SETUP -> { ITERATION_SETUP -> { INVOCATION_SETUP -> [INVOCATION] -> INVOCATION_TEARDOWN }*
//!                  -> ITERATION_TEARDOWN }* -> TRIAL_TEARDOWN
//! ```
//!
//! Only INVOCATION is timed. Every phase runs through [`fast_exec`].

use crate::bench::{BenchConfiguration, ResolvedHooks};
use crate::exec::fast_exec;
use crate::measure::Timer;
use crate::profiler::ProfilerSet;
use crate::stack::{ScriptError, StackMachine};
use crate::value::Macro;
use macrobench_ipc::{BenchMode, IterationPhase, IterationResult, TrialPlan};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Batch samples kept per SampleTime iteration before decimation kicks in.
pub const MAX_SAMPLES_PER_ITERATION: usize = macrobench_ipc::MAX_ITERATION_SAMPLES;

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `pretrial`
    TrialSetup,
    /// `preiteration`
    IterationSetup,
    /// `preinvocation`
    InvocationSetup,
    /// The measured macro
    Invocation,
    /// `postinvocation`
    InvocationTeardown,
    /// `postiteration`
    IterationTeardown,
    /// `posttrial`
    TrialTeardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::TrialSetup => "TRIAL_SETUP",
            Phase::IterationSetup => "ITERATION_SETUP",
            Phase::InvocationSetup => "INVOCATION_SETUP",
            Phase::Invocation => "INVOCATION",
            Phase::InvocationTeardown => "INVOCATION_TEARDOWN",
            Phase::IterationTeardown => "ITERATION_TEARDOWN",
            Phase::TrialTeardown => "TRIAL_TEARDOWN",
        };
        f.write_str(name)
    }
}

/// A macro failed during a phase. Fatal to the trial.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{phase} failed: {source}")]
pub struct PhaseError {
    /// Where it happened
    pub phase: Phase,
    /// What the macro raised
    #[source]
    pub source: ScriptError,
}

#[inline(always)]
fn run_phase<S: StackMachine>(stack: &mut S, code: &Macro, phase: Phase) -> Result<(), PhaseError> {
    fast_exec(stack, code).map_err(|source| PhaseError { phase, source })
}

/// Keeps at most `cap` samples by dropping every other one and halving the
/// sampling rate whenever the buffer fills.
#[derive(Debug)]
struct SampleBuffer {
    samples: Vec<u64>,
    cap: usize,
    stride: u64,
    seen: u64,
}

impl SampleBuffer {
    fn new(cap: usize) -> Self {
        Self {
            samples: Vec::new(),
            cap: cap.max(2),
            stride: 1,
            seen: 0,
        }
    }

    fn push(&mut self, sample: u64) {
        self.seen += 1;
        if self.seen % self.stride != 0 {
            return;
        }
        if self.samples.len() == self.cap {
            let mut keep = false;
            self.samples.retain(|_| {
                keep = !keep;
                keep
            });
            self.stride *= 2;
            if self.seen % self.stride != 0 {
                return;
            }
        }
        self.samples.push(sample);
    }
}

/// Runs trials of one benchmark configuration on one stack.
pub struct LifecycleRunner<S: StackMachine> {
    stack: S,
    hooks: ResolvedHooks,
}

impl<S: StackMachine> LifecycleRunner<S> {
    /// Prepare a runner; the default `postinvocation` is applied here.
    pub fn new(stack: S, bench: &BenchConfiguration) -> Self {
        Self {
            stack,
            hooks: bench.resolve(),
        }
    }

    /// The stack, as left by the last phase.
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Give the stack back.
    pub fn into_stack(self) -> S {
        self.stack
    }

    /// Run a whole trial. Warmup iterations are returned too, tagged as such.
    pub fn run(&mut self, plan: &TrialPlan) -> Result<Vec<IterationResult>, PhaseError> {
        let mut profilers = ProfilerSet::new(&plan.profilers);
        let mut results = Vec::new();

        run_phase(&mut self.stack, &self.hooks.pretrial, Phase::TrialSetup)?;

        if plan.warmup_mode.is_bulk() {
            for &mode in &plan.modes {
                self.warmup(plan, mode, &mut profilers, &mut results)?;
            }
        }
        for &mode in &plan.modes {
            if plan.warmup_mode.is_individual() {
                self.warmup(plan, mode, &mut profilers, &mut results)?;
            }
            for index in 0..plan.measurement_iterations {
                let result =
                    self.iteration(plan, mode, IterationPhase::Measurement, index, &mut profilers)?;
                debug!(
                    mode = mode.label(),
                    index,
                    invocations = result.invocations,
                    timed_nanos = result.timed_nanos,
                    "measurement iteration"
                );
                results.push(result);
            }
        }

        run_phase(&mut self.stack, &self.hooks.posttrial, Phase::TrialTeardown)?;
        Ok(results)
    }

    fn warmup(
        &mut self,
        plan: &TrialPlan,
        mode: BenchMode,
        profilers: &mut ProfilerSet,
        results: &mut Vec<IterationResult>,
    ) -> Result<(), PhaseError> {
        for index in 0..plan.warmup_iterations {
            let result = self.iteration(plan, mode, IterationPhase::Warmup, index, profilers)?;
            results.push(result);
        }
        Ok(())
    }

    fn iteration(
        &mut self,
        plan: &TrialPlan,
        mode: BenchMode,
        phase: IterationPhase,
        index: u32,
        profilers: &mut ProfilerSet,
    ) -> Result<IterationResult, PhaseError> {
        let (budget_ns, batch_size) = match phase {
            IterationPhase::Warmup => (plan.warmup_time_ns, plan.warmup_batch_size),
            IterationPhase::Measurement => (plan.measurement_time_ns, plan.measurement_batch_size),
        };
        let batch_size = batch_size.max(1);
        let budget = Duration::from_nanos(budget_ns);
        let stack = &mut self.stack;
        let hooks = &self.hooks;

        run_phase(stack, &hooks.preiteration, Phase::IterationSetup)?;
        profilers.begin_iteration();
        let track_depth = profilers.tracks_depth();

        let mut invocations = 0u64;
        let mut timed_nanos = 0u64;
        let mut samples = SampleBuffer::new(MAX_SAMPLES_PER_ITERATION);
        let started = Instant::now();
        loop {
            let mut batch_nanos = 0u64;
            for _ in 0..batch_size {
                run_phase(stack, &hooks.preinvocation, Phase::InvocationSetup)?;
                let timer = Timer::start();
                let outcome = fast_exec(stack, &hooks.measured);
                batch_nanos += timer.stop();
                outcome.map_err(|source| PhaseError {
                    phase: Phase::Invocation,
                    source,
                })?;
                if track_depth {
                    profilers.after_invocation(stack.depth());
                }
                run_phase(stack, &hooks.postinvocation, Phase::InvocationTeardown)?;
            }
            invocations += u64::from(batch_size);
            timed_nanos += batch_nanos;
            if mode == BenchMode::SampleTime {
                samples.push(batch_nanos);
            }
            if mode == BenchMode::SingleShotTime || started.elapsed() >= budget {
                break;
            }
        }

        let operations = invocations * u64::from(plan.operations_per_invocation.max(1));
        let secondary = profilers.end_iteration(operations);
        run_phase(stack, &hooks.postiteration, Phase::IterationTeardown)?;
        if plan.should_do_gc {
            stack.reclaim();
        }

        Ok(IterationResult {
            mode,
            phase,
            index,
            invocations,
            operations,
            timed_nanos,
            batch_size,
            samples: samples.samples,
            secondary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::Hook;
    use crate::registry::Registry;
    use crate::snapshot::decode_macro;
    use crate::stack::MemoryStack;
    use crate::value::Value;
    use macrobench_ipc::WarmupMode;

    fn code(text: &str) -> Macro {
        decode_macro(text, &Registry::builtins()).unwrap()
    }

    fn quick_plan(modes: Vec<BenchMode>) -> TrialPlan {
        TrialPlan {
            modes,
            warmup_iterations: 1,
            warmup_time_ns: 1_000_000,
            measurement_iterations: 2,
            measurement_time_ns: 2_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_postinvocation_leaves_stack_empty() {
        let bench = BenchConfiguration::from_macro(code("<% 1 1 + %>"));
        let mut runner = LifecycleRunner::new(MemoryStack::new(), &bench);
        let results = runner.run(&quick_plan(vec![BenchMode::Throughput])).unwrap();
        assert_eq!(runner.stack().depth(), 0);

        let measured: Vec<_> = results
            .iter()
            .filter(|r| r.phase == IterationPhase::Measurement)
            .collect();
        assert_eq!(measured.len(), 2);
        assert!(measured.iter().all(|r| r.invocations > 0 && r.operations == r.invocations));
    }

    #[test]
    fn test_explicit_postinvocation_replaces_clear() {
        // without the default clear every invocation's result stays behind
        let bench = BenchConfiguration::from_macro(code("<% 1 %>"))
            .with_hook(Hook::PostInvocation, Macro::empty());
        let plan = TrialPlan {
            modes: vec![BenchMode::SingleShotTime],
            warmup_iterations: 0,
            measurement_iterations: 3,
            measurement_batch_size: 4,
            ..Default::default()
        };
        let mut runner = LifecycleRunner::new(MemoryStack::new(), &bench);
        runner.run(&plan).unwrap();
        assert_eq!(runner.stack().depth(), 12);
    }

    #[test]
    fn test_hook_order_is_recorded_on_stack() {
        let bench = BenchConfiguration::from_macro(code("<% 'i' %>"))
            .with_hook(Hook::PreTrial, code("<% 'T' %>"))
            .with_hook(Hook::PreIteration, code("<% 'I' %>"))
            .with_hook(Hook::PreInvocation, code("<% 'v' %>"))
            .with_hook(Hook::PostInvocation, code("<% '/v' %>"))
            .with_hook(Hook::PostIteration, code("<% '/I' %>"))
            .with_hook(Hook::PostTrial, code("<% '/T' %>"));
        let plan = TrialPlan {
            modes: vec![BenchMode::SingleShotTime],
            warmup_iterations: 0,
            measurement_iterations: 1,
            measurement_batch_size: 2,
            ..Default::default()
        };
        let mut runner = LifecycleRunner::new(MemoryStack::new(), &bench);
        runner.run(&plan).unwrap();
        let trace: Vec<_> = runner
            .stack()
            .values()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            trace,
            ["T", "I", "v", "i", "/v", "v", "i", "/v", "/I", "/T"]
        );
    }

    #[test]
    fn test_single_shot_runs_one_batch() {
        let bench = BenchConfiguration::from_macro(code("<% NOOP %>"));
        let plan = TrialPlan {
            modes: vec![BenchMode::SingleShotTime],
            warmup_iterations: 0,
            measurement_iterations: 2,
            measurement_batch_size: 5,
            operations_per_invocation: 3,
            ..Default::default()
        };
        let mut runner = LifecycleRunner::new(MemoryStack::new(), &bench);
        let results = runner.run(&plan).unwrap();
        assert_eq!(results.len(), 2);
        for r in &results {
            assert_eq!(r.invocations, 5);
            assert_eq!(r.operations, 15);
        }
    }

    #[test]
    fn test_sample_time_records_batches() {
        let bench = BenchConfiguration::from_macro(code("<% NOOP %>"));
        let mut plan = quick_plan(vec![BenchMode::SampleTime]);
        plan.measurement_batch_size = 2;
        let mut runner = LifecycleRunner::new(MemoryStack::new(), &bench);
        let results = runner.run(&plan).unwrap();
        for r in results.iter().filter(|r| r.phase == IterationPhase::Measurement) {
            assert!(!r.samples.is_empty());
            assert_eq!(r.samples.len() as u64 * 2, r.invocations);
            assert_eq!(r.samples.iter().sum::<u64>(), r.timed_nanos);
        }
    }

    #[test]
    fn test_warmup_modes() {
        let bench = BenchConfiguration::from_macro(code("<% NOOP %>"));
        let modes = vec![BenchMode::Throughput, BenchMode::AverageTime];
        let count = |warmup_mode| {
            let mut plan = quick_plan(modes.clone());
            plan.warmup_mode = warmup_mode;
            let mut runner = LifecycleRunner::new(MemoryStack::new(), &bench);
            let results = runner.run(&plan).unwrap();
            results
                .iter()
                .map(|r| (r.mode, r.phase))
                .collect::<Vec<_>>()
        };

        use BenchMode::*;
        use IterationPhase::*;
        assert_eq!(
            count(WarmupMode::Individual),
            [
                (Throughput, Warmup),
                (Throughput, Measurement),
                (Throughput, Measurement),
                (AverageTime, Warmup),
                (AverageTime, Measurement),
                (AverageTime, Measurement),
            ]
        );
        assert_eq!(
            count(WarmupMode::Bulk),
            [
                (Throughput, Warmup),
                (AverageTime, Warmup),
                (Throughput, Measurement),
                (Throughput, Measurement),
                (AverageTime, Measurement),
                (AverageTime, Measurement),
            ]
        );
        assert_eq!(count(WarmupMode::BulkIndividual).len(), 8);
    }

    #[test]
    fn test_faulting_macro_reports_phase() {
        let bench = BenchConfiguration::from_macro(code("<% 1 0 / %>"));
        let mut runner = LifecycleRunner::new(MemoryStack::new(), &bench);
        let err = runner.run(&quick_plan(vec![BenchMode::Throughput])).unwrap_err();
        assert_eq!(err.phase, Phase::Invocation);
        assert_eq!(err.source, ScriptError::DivisionByZero);
        assert_eq!(err.to_string(), "INVOCATION failed: division by zero");
    }

    #[test]
    fn test_faulting_hook_reports_phase() {
        let bench = BenchConfiguration::from_macro(Macro::empty())
            .with_hook(Hook::PostTrial, code("<% 'done' FAIL %>"));
        let mut runner = LifecycleRunner::new(MemoryStack::new(), &bench);
        let err = runner.run(&quick_plan(vec![BenchMode::Throughput])).unwrap_err();
        assert_eq!(err.phase, Phase::TrialTeardown);
        assert_eq!(err.source, ScriptError::Fault("done".to_string()));
    }

    #[test]
    fn test_profilers_attach_secondary() {
        let bench = BenchConfiguration::from_macro(code("<% 1 2 3 %>"));
        let mut plan = quick_plan(vec![BenchMode::Throughput]);
        plan.profilers = vec!["stack".to_string()];
        let mut runner = LifecycleRunner::new(MemoryStack::new(), &bench);
        let results = runner.run(&plan).unwrap();
        let last = results.last().unwrap();
        assert_eq!(last.secondary[0].name, "·stack.depth.max");
        assert_eq!(last.secondary[0].value, 3.0);
    }

    #[test]
    fn test_sample_buffer_decimates() {
        let mut buffer = SampleBuffer::new(4);
        for i in 0..100 {
            buffer.push(i);
        }
        assert!(buffer.samples.len() <= 4);
        assert!(buffer.stride > 1);
        assert!(buffer.samples.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_stack_values_survive_between_hooks() {
        let bench = BenchConfiguration::from_macro(code("<% DUP * %>"))
            .with_hook(Hook::PreInvocation, code("<% 7 %>"))
            .with_hook(Hook::PostInvocation, code("<% 49 - <% %> SWAP DROP DROP %>"));
        let plan = TrialPlan {
            modes: vec![BenchMode::SingleShotTime],
            warmup_iterations: 0,
            measurement_iterations: 1,
            ..Default::default()
        };
        let mut runner = LifecycleRunner::new(MemoryStack::new(), &bench);
        runner.run(&plan).unwrap();
        assert_eq!(runner.stack().values(), &[] as &[Value]);
    }
}
