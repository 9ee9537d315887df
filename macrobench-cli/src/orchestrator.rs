//! Fork Orchestration
//!
//! Writes the transport files, runs warmup forks and then measurement forks
//! one after the other, and aggregates the measurement forks into results.
//! With zero forks the trial runs inside the current process instead.

use crate::aggregate::aggregate;
use crate::error::{BenchError, ExecutionError};
use crate::options::RunSpec;
use crate::supervisor::{LaunchSpec, TrialOutcome, WorkerHandle};
use indicatif::{ProgressBar, ProgressStyle};
use macrobench_core::{
    BenchConfiguration, HostConfig, Registry, TransportError, TransportFiles, TransportHandles,
    TrialHost, execute_trial,
};
use macrobench_ipc::{FailureKind, FailureTree, IterationResult, TrialPlan};
use macrobench_report::RunResult;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Environment variable naming the worker executable, overriding the current one.
pub const WORKER_BINARY_ENV: &str = "MACROBENCH_WORKER";

/// Context of every measurement error.
pub const RUN_FAILURE: &str = "macro benchmark run failed";

/// Index of the node that best explains a failure: the first suppressed entry
/// of the root's cause. Without one the wrapper at the root is reported as-is.
pub fn root_cause(tree: &FailureTree) -> u32 {
    tree.root()
        .cause
        .and_then(|cause| tree.node(cause))
        .and_then(|node| node.suppressed.first().copied())
        .unwrap_or(0)
}

/// Measurement error for a failure tree reported by a trial.
pub fn measurement_error(tree: FailureTree, context: &str) -> ExecutionError {
    let wrapped = tree.wrap(FailureKind::Wrapper, context);
    let root = wrapped
        .node(root_cause(&wrapped))
        .map(|node| node.message.clone())
        .unwrap_or_default();
    ExecutionError::Measurement {
        context: RUN_FAILURE.to_string(),
        root,
        tree: wrapped,
    }
}

/// Runs benchmarks for one host configuration.
pub struct Orchestrator {
    host: HostConfig,
    registry: Registry,
    worker_binary: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    progress: bool,
}

impl Orchestrator {
    /// Orchestrator whose registry includes the extensions `host` names.
    pub fn new(host: HostConfig) -> Result<Self, BenchError> {
        let registry = Registry::for_host(&host).map_err(TransportError::Extension)?;
        Ok(Self {
            host,
            registry,
            worker_binary: None,
            temp_dir: None,
            timeout: None,
            progress: false,
        })
    }

    /// Launch this executable as the worker.
    pub fn with_worker_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.worker_binary = Some(binary.into());
        self
    }

    /// Write transport files here instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Kill a fork that runs longer than this.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Show a progress bar over forks.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Operations available to snapshots run by this orchestrator.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Host configuration, including properties not forwarded to workers.
    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    fn worker_binary(&self) -> Result<PathBuf, BenchError> {
        if let Some(binary) = &self.worker_binary {
            return Ok(binary.clone());
        }
        if let Some(binary) = std::env::var_os(WORKER_BINARY_ENV) {
            return Ok(PathBuf::from(binary));
        }
        std::env::current_exe().map_err(|e| ExecutionError::Launch(e).into())
    }

    /// Run `bench` as described by `spec`. Transport files are removed on
    /// every path out of this function.
    pub fn run(
        &self,
        spec: &RunSpec,
        bench: &BenchConfiguration,
    ) -> Result<Vec<RunResult>, BenchError> {
        let started = Instant::now();
        let bootstrap = self.host.bootstrap_subset();
        let files = match &self.temp_dir {
            Some(dir) => TransportFiles::write_in(dir, bench, &bootstrap)?,
            None => TransportFiles::write(bench, &bootstrap)?,
        };
        let handles = files.handles();
        debug!(
            bench_config = %handles.bench_config.display(),
            host_config = %handles.host_config.display(),
            "transport files written"
        );

        let outcome = self.run_with(&handles, spec);
        let closed = files.close();
        let forks = outcome?;
        closed?;

        let results = aggregate(&forks, spec, bench);
        info!(
            results = results.len(),
            forks = spec.forks(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "benchmark complete"
        );
        Ok(results)
    }

    fn run_with(
        &self,
        handles: &TransportHandles,
        spec: &RunSpec,
    ) -> Result<Vec<Vec<IterationResult>>, BenchError> {
        let plan = spec.trial_plan();

        if spec.forks() == 0 {
            info!("forks = 0, running in-process");
            let iterations = execute_trial(handles, &plan, TrialHost::InProcess(&self.registry))
                .map_err(|tree| measurement_error(tree, "in-process trial failed"))?;
            return Ok(vec![iterations]);
        }

        let launch = LaunchSpec {
            binary: self.worker_binary()?,
            args: handles
                .to_args()
                .into_iter()
                .chain(spec.launch_flags())
                .collect(),
            timeout: self.timeout,
        };

        let total = u64::from(spec.warmup_forks()) + u64::from(spec.forks());
        let bar = self.progress_bar(total);

        for fork in 0..spec.warmup_forks() {
            bar.set_message(format!("warmup fork {}/{}", fork + 1, spec.warmup_forks()));
            let discarded = self
                .run_fork(&launch, &plan, &format!("warmup fork {fork} failed"))
                .map_err(|e| abandon(&bar, e))?;
            debug!(fork, iterations = discarded.len(), "warmup fork discarded");
            bar.inc(1);
        }

        let mut forks = Vec::with_capacity(spec.forks() as usize);
        for fork in 0..spec.forks() {
            bar.set_message(format!("fork {}/{}", fork + 1, spec.forks()));
            let iterations = self
                .run_fork(&launch, &plan, &format!("fork {fork} failed"))
                .map_err(|e| abandon(&bar, e))?;
            debug!(fork, iterations = iterations.len(), "measurement fork complete");
            forks.push(iterations);
            bar.inc(1);
        }
        bar.finish_and_clear();

        Ok(forks)
    }

    fn run_fork(
        &self,
        launch: &LaunchSpec,
        plan: &TrialPlan,
        context: &str,
    ) -> Result<Vec<IterationResult>, BenchError> {
        let mut worker = WorkerHandle::launch(launch)?;
        match worker.run_trial(plan) {
            Ok(TrialOutcome::Completed(iterations)) => {
                worker.shutdown()?;
                Ok(iterations)
            }
            Ok(TrialOutcome::Failed(tree)) => {
                if let Err(e) = worker.shutdown() {
                    warn!(error = %e, "worker did not shut down after a failure");
                }
                Err(measurement_error(tree, context).into())
            }
            Err(e) => {
                worker.kill();
                Err(e)
            }
        }
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar
    }
}

fn abandon(bar: &ProgressBar, e: BenchError) -> BenchError {
    bar.abandon();
    e
}
