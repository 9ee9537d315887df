#![warn(missing_docs)]
//! Macrobench IPC Protocol
//!
//! Framed rkyv messages exchanged between the orchestrator and its worker
//! subprocesses: the trial plan going down, iteration results and failure trees
//! coming back.

mod failure;
mod framing;
mod messages;

pub use failure::{FailureKind, FailureNode, FailureTree};
pub use framing::{
    COMMAND_FRAME_LIMIT, Frame, FrameError, FrameReader, FrameWriter, MAX_ITERATION_SAMPLES,
    MESSAGE_FRAME_LIMIT,
};
pub use messages::{
    BenchMode, IterationPhase, IterationResult, SecondaryValue, SupervisorCommand, TrialPlan,
    WarmupMode, WorkerCapabilities, WorkerMessage,
};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable advertising the inherited pipe fds (`"<cmd>,<msg>"`).
pub const IPC_FD_ENV: &str = "MACROBENCH_IPC_FD";
