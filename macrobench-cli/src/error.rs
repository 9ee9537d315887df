//! Error types of a benchmark run

use crate::options::ValidationError;
use macrobench_core::{ScriptError, TransportError};
use macrobench_ipc::FailureTree;
use std::time::Duration;
use thiserror::Error;

/// A fork could not be launched or did not produce a measurement.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Worker process could not be spawned
    #[error("failed to launch worker: {0}")]
    Launch(#[source] std::io::Error),

    /// The benchmark itself failed; `root` is the unwrapped root cause.
    #[error("{context}: {root}")]
    Measurement {
        /// Run-level description
        context: String,
        /// Message of the root-cause node
        root: String,
        /// Full failure, wrapped with the fork that reported it
        tree: FailureTree,
    },

    /// Worker exited or hung up mid-trial
    #[error("worker crashed: {0}")]
    Crashed(String),

    /// Worker ran past `[runner] timeout`
    #[error("worker exceeded the fork timeout of {0:?}")]
    Timeout(Duration),

    /// Out-of-order or mismatched message
    #[error("worker protocol error: expected {expected}, got {got}")]
    Protocol {
        /// Message the supervisor waited for
        expected: String,
        /// Message it received
        got: String,
    },
}

/// A worker payload could not be decoded or a result could not be encoded.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Frame payload failed validation
    #[error("malformed {stream}: {reason}")]
    Payload {
        /// Stream the frame arrived on
        stream: &'static str,
        /// Validation error
        reason: String,
    },

    /// Supervisor command could not be archived
    #[error("{label} command could not be encoded: {reason}")]
    Command {
        /// Command variant
        label: &'static str,
        /// Serializer error
        reason: String,
    },

    /// Result record failed to encode
    #[error("result encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything that can stop a run.
#[derive(Debug, Error)]
pub enum BenchError {
    /// Options or benchmark input rejected
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Transport files could not be written or removed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A fork failed
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// A payload could not be decoded or encoded
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// The calling stack did not hold the expected arguments.
    #[error("macrobench: {0}")]
    Stack(#[from] ScriptError),
}
