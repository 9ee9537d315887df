//! Worker Process Entry Point
//!
//! Handles the worker side of the orchestrator/worker architecture.
//!
//! On Unix, uses the inherited fd pair advertised in `MACROBENCH_IPC_FD` and
//! installs a SIGTERM handler for graceful shutdown. Elsewhere it falls back to
//! stdin/stdout and skips signal handling.

use crate::bench::BenchConfiguration;
use crate::heap::HeapLimits;
use crate::measure::pin_to_cpu;
use crate::registry::Registry;
use crate::runner::{LifecycleRunner, PhaseError};
use crate::stack::{MemoryStack, StackMachine};
use crate::transport::{TransportError, TransportHandles};
use crate::value::Value;
use macrobench_ipc::{
    FailureKind, FailureTree, FrameError, FrameReader, FrameWriter, IPC_FD_ENV, IterationResult,
    SupervisorCommand, TrialPlan, WorkerCapabilities, WorkerMessage,
};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::io::FromRawFd;

/// Stack attribute holding the access token of a benchmark stack.
pub const TOKEN_ATTRIBUTE: &str = "macrobench.token";

const ACCESS_TOKEN: &str = "macrobench-worker";

/// Message of the wrapper node every trial failure is reported under.
pub const TRIAL_FAILURE: &str = "macro benchmark failed";

/// Global flag set by SIGTERM handler to request graceful shutdown.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check if a graceful shutdown has been requested via SIGTERM.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

#[cfg(unix)]
fn install_sigterm_handler() {
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigterm_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn sigterm_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

#[cfg(not(unix))]
fn install_sigterm_handler() {}

/// Where a trial gets its operation registry from.
#[derive(Debug, Clone, Copy)]
pub enum TrialHost<'a> {
    /// Fresh process: restore the host configuration and register its extensions.
    Forked,
    /// Running inside the orchestrator, which already has a registry.
    InProcess(&'a Registry),
}

/// Why a trial did not complete.
#[derive(Debug, Error)]
enum TrialError {
    #[error("invalid trial plan: {0}")]
    Plan(String),

    #[error(transparent)]
    Bootstrap(#[from] TransportError),

    #[error(transparent)]
    Phase(#[from] PhaseError),
}

impl TrialError {
    fn kind(&self) -> FailureKind {
        match self {
            TrialError::Plan(_) => FailureKind::Unknown,
            TrialError::Bootstrap(_) => FailureKind::Bootstrap,
            TrialError::Phase(_) => FailureKind::Script,
        }
    }
}

/// Failure tree in the shape every trial failure takes: a wrapper whose first
/// suppressed entry is the real error.
fn trial_failure(real: FailureTree) -> FailureTree {
    let mut tree = FailureTree::new(FailureKind::Wrapper, TRIAL_FAILURE);
    let idx = tree.graft(real);
    tree.add_suppressed(0, idx);
    tree
}

fn bootstrap(
    handles: &TransportHandles,
    host: TrialHost<'_>,
) -> Result<(MemoryStack, BenchConfiguration), TransportError> {
    let bench = match host {
        TrialHost::Forked => {
            let host = handles.read_host()?;
            let registry = Registry::for_host(&host).map_err(TransportError::Extension)?;
            handles.read_bench(&registry)?
        }
        TrialHost::InProcess(registry) => handles.read_bench(registry)?,
    };
    let mut stack = MemoryStack::new();
    stack.max_limits();
    stack.set_attribute(TOKEN_ATTRIBUTE, Value::from(ACCESS_TOKEN));
    Ok((stack, bench))
}

/// Run one trial in the current process: restore the transport files, then drive
/// the lifecycle. Panics are caught and reported like any other failure.
pub fn execute_trial(
    handles: &TransportHandles,
    plan: &TrialPlan,
    host: TrialHost<'_>,
) -> Result<Vec<IterationResult>, FailureTree> {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(
        || -> Result<Vec<IterationResult>, TrialError> {
            plan.validate().map_err(TrialError::Plan)?;
            let (stack, bench) = bootstrap(handles, host)?;
            let mut runner = LifecycleRunner::new(stack, &bench);
            Ok(runner.run(plan)?)
        },
    ));

    match outcome {
        Ok(Ok(iterations)) => Ok(iterations),
        Ok(Err(err)) => {
            Err(trial_failure(FailureTree::from_error(err.kind(), &err)))
        }
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            Err(trial_failure(FailureTree::new(FailureKind::Panic, message)))
        }
    }
}

/// IPC transport: either inherited fd pair or stdin/stdout fallback.
enum IpcTransport {
    #[cfg(unix)]
    Fds { read_fd: i32, write_fd: i32 },
    Stdio,
}

fn detect_transport() -> IpcTransport {
    #[cfg(unix)]
    if let Ok(val) = std::env::var(IPC_FD_ENV) {
        if let Some((r, w)) = val.split_once(',') {
            if let (Ok(read_fd), Ok(write_fd)) = (r.parse::<i32>(), w.parse::<i32>()) {
                return IpcTransport::Fds { read_fd, write_fd };
            }
        }
        warn!("invalid {IPC_FD_ENV}={val:?} (expected <read_fd>,<write_fd>), falling back to stdio");
    }
    IpcTransport::Stdio
}

/// Worker main loop
pub struct WorkerMain {
    reader: FrameReader<Box<dyn std::io::Read>>,
    writer: FrameWriter<Box<dyn std::io::Write>>,
    handles: TransportHandles,
    heap: HeapLimits,
}

impl WorkerMain {
    /// Create a worker for the given transport files.
    pub fn new(handles: TransportHandles, heap: HeapLimits) -> Self {
        let (reader, writer): (Box<dyn std::io::Read>, Box<dyn std::io::Write>) =
            match detect_transport() {
                #[cfg(unix)]
                IpcTransport::Fds { read_fd, write_fd } => {
                    // SAFETY: the orchestrator dup2'd these fds for us and nothing else owns them.
                    let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
                    let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
                    (Box::new(read_file), Box::new(write_file))
                }
                IpcTransport::Stdio => (Box::new(std::io::stdin()), Box::new(std::io::stdout())),
            };
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            handles,
            heap,
        }
    }

    /// Run the worker main loop until shutdown or disconnect.
    pub fn run(&mut self) -> Result<(), FrameError> {
        install_sigterm_handler();

        let heap_limit = self.heap.apply().unwrap_or_else(|e| {
            warn!(error = %e, "could not apply heap limit");
            None
        });
        self.writer.write(&WorkerMessage::Hello(WorkerCapabilities::current(
            crate::allocator::is_tracking(),
            heap_limit,
        )))?;

        if let Err(e) = pin_to_cpu(0) {
            debug!(error = %e, "cpu pinning unavailable");
        }

        loop {
            if shutdown_requested() {
                break;
            }

            let command: SupervisorCommand = match self.reader.read() {
                Ok(command) => command,
                Err(e) if e.is_disconnect() => break,
                Err(e) => return Err(e),
            };

            match command {
                SupervisorCommand::Run { plan } => {
                    self.run_trial(&plan)?;
                    if shutdown_requested() {
                        break;
                    }
                }
                SupervisorCommand::Shutdown => break,
                SupervisorCommand::Ping => {}
            }
        }

        Ok(())
    }

    fn run_trial(&mut self, plan: &TrialPlan) -> Result<(), FrameError> {
        let started = std::time::Instant::now();
        match execute_trial(&self.handles, plan, TrialHost::Forked) {
            Ok(iterations) => {
                let count = iterations.len() as u32;
                for iteration in iterations {
                    self.writer.write(&WorkerMessage::Iteration(iteration))?;
                }
                self.writer.write(&WorkerMessage::Complete {
                    iterations: count,
                    total_duration_nanos: started.elapsed().as_nanos() as u64,
                })
            }
            Err(tree) => {
                debug!(failure = %tree, "trial failed");
                report_failure(&mut self.writer, tree)
            }
        }
    }
}

/// Send a failure tree. One too large for a frame is replaced by a tree that
/// states its size.
fn report_failure<W: std::io::Write>(
    writer: &mut FrameWriter<W>,
    tree: FailureTree,
) -> Result<(), FrameError> {
    match writer.write(&WorkerMessage::Failure(tree)) {
        Err(FrameError::TooLarge { size, max, .. }) => {
            warn!(size, max, "failure report exceeds the frame limit");
            let summary = FailureTree::new(
                FailureKind::Unknown,
                format!("failure report of {size} bytes exceeds the {max} byte frame limit"),
            );
            writer.write(&WorkerMessage::Failure(trial_failure(summary)))
        }
        other => other,
    }
}
