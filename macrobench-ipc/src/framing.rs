//! Length-Prefixed Frame Encoding
//!
//! Message boundaries over the worker pipes.
//!
//! ```text
//! +----------------+------------------+
//! | length (4 LE)  | rkyv payload     |
//! +----------------+------------------+
//! ```
//!
//! Each direction has its own size limit: commands only ever carry a trial
//! plan, while worker messages may carry a full set of SampleTime samples or a
//! failure tree. A length prefix above the limit of the expected message type
//! is rejected before anything is allocated.

use crate::messages::{SupervisorCommand, WorkerMessage};
use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use thiserror::Error;

/// Batch samples a single SampleTime iteration may carry.
pub const MAX_ITERATION_SAMPLES: usize = 100_000;

/// Largest supervisor command frame. A trial plan is a handful of integers,
/// the mode list and the profiler names.
pub const COMMAND_FRAME_LIMIT: usize = 64 * 1024;

/// Room a worker message has besides its samples, for failure trees and
/// profiler output.
const FAILURE_BUDGET: usize = 1024 * 1024;

/// Largest worker message frame.
pub const MESSAGE_FRAME_LIMIT: usize = MAX_ITERATION_SAMPLES * 8 + FAILURE_BUDGET;

const PIPE_BUFFER: usize = 64 * 1024;

/// A message type that travels over one direction of the pipe pair.
pub trait Frame {
    /// Name of the stream, used in errors.
    const STREAM: &'static str;
    /// Largest encoded size accepted in either direction.
    const LIMIT: usize;

    /// Variant name of this message.
    fn label(&self) -> &'static str;
}

impl Frame for WorkerMessage {
    const STREAM: &'static str = "worker message";
    const LIMIT: usize = MESSAGE_FRAME_LIMIT;

    fn label(&self) -> &'static str {
        match self {
            WorkerMessage::Hello(_) => "Hello",
            WorkerMessage::Iteration(_) => "Iteration",
            WorkerMessage::Complete { .. } => "Complete",
            WorkerMessage::Failure(_) => "Failure",
        }
    }
}

impl Frame for SupervisorCommand {
    const STREAM: &'static str = "supervisor command";
    const LIMIT: usize = COMMAND_FRAME_LIMIT;

    fn label(&self) -> &'static str {
        match self {
            SupervisorCommand::Run { .. } => "Run",
            SupervisorCommand::Shutdown => "Shutdown",
            SupervisorCommand::Ping => "Ping",
        }
    }
}

/// A frame could not be sent or received.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Pipe read or write failed
    #[error("{stream}: pipe error: {source}")]
    Io {
        /// Stream being read or written
        stream: &'static str,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Peer closed the pipe between frames
    #[error("{stream}: peer closed the pipe")]
    Closed {
        /// Stream that was expected
        stream: &'static str,
    },

    /// Frame above the stream's limit
    #[error("{stream}: {label} of {size} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Stream the frame belongs to
        stream: &'static str,
        /// Variant name, or `frame` when only the length prefix was seen
        label: &'static str,
        /// Announced or encoded size
        size: usize,
        /// Limit of the stream
        max: usize,
    },

    /// Zero-length frame or payload that failed validation
    #[error("{stream}: malformed frame: {reason}")]
    Malformed {
        /// Stream that was expected
        stream: &'static str,
        /// What was wrong
        reason: String,
    },

    /// Message could not be archived
    #[error("{label} could not be encoded: {reason}")]
    Encode {
        /// Variant name
        label: &'static str,
        /// Serializer error
        reason: String,
    },
}

impl FrameError {
    /// True when the peer hung up rather than sent garbage.
    pub fn is_disconnect(&self) -> bool {
        match self {
            FrameError::Closed { .. } => true,
            FrameError::Io { source, .. } => {
                matches!(source.kind(), ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof)
            }
            _ => false,
        }
    }
}

/// Buffered sending half of a pipe.
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Wrap a raw writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(PIPE_BUFFER, writer),
        }
    }

    /// Send one message and flush it.
    pub fn write<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Frame + Serialize<AllocSerializer<256>>,
    {
        let bytes = rkyv::to_bytes::<_, 256>(message).map_err(|e| FrameError::Encode {
            label: message.label(),
            reason: e.to_string(),
        })?;
        if bytes.len() > T::LIMIT {
            return Err(FrameError::TooLarge {
                stream: T::STREAM,
                label: message.label(),
                size: bytes.len(),
                max: T::LIMIT,
            });
        }

        let io = |source| FrameError::Io {
            stream: T::STREAM,
            source,
        };
        self.writer
            .write_all(&(bytes.len() as u32).to_le_bytes())
            .map_err(io)?;
        self.writer.write_all(&bytes).map_err(io)?;
        self.writer.flush().map_err(io)
    }
}

/// Buffered receiving half of a pipe.
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a raw reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(PIPE_BUFFER, reader),
        }
    }

    /// Receive one message and validate it.
    pub fn read<T>(&mut self) -> Result<T, FrameError>
    where
        T: Frame + Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(FrameError::Closed { stream: T::STREAM });
            }
            Err(source) => {
                return Err(FrameError::Io {
                    stream: T::STREAM,
                    source,
                });
            }
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > T::LIMIT {
            return Err(FrameError::TooLarge {
                stream: T::STREAM,
                label: "frame",
                size: len,
                max: T::LIMIT,
            });
        }
        if len == 0 {
            return Err(FrameError::Malformed {
                stream: T::STREAM,
                reason: "zero-length frame".to_string(),
            });
        }

        // rkyv needs an aligned buffer
        let mut buf = rkyv::AlignedVec::with_capacity(len);
        buf.resize(len, 0);
        self.reader
            .read_exact(&mut buf)
            .map_err(|source| FrameError::Io {
                stream: T::STREAM,
                source,
            })?;

        let malformed = |reason: String| FrameError::Malformed {
            stream: T::STREAM,
            reason,
        };
        let archived =
            rkyv::check_archived_root::<T>(&buf).map_err(|e| malformed(e.to_string()))?;
        archived
            .deserialize(&mut Infallible)
            .map_err(|e| malformed(format!("{e:?}")))
    }

    /// Whether a frame (or part of one) is already buffered, in which case
    /// polling the underlying fd would under-report readiness.
    pub fn has_buffered_data(&self) -> bool {
        !self.reader.buffer().is_empty()
    }
}
