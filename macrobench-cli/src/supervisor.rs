//! Worker Subprocesses
//!
//! One fork is one worker process. The supervisor spawns it with an inherited
//! pipe pair (fd 3 for commands, fd 4 for messages), sends a trial plan and
//! collects iteration results until the worker completes or reports a failure.

use crate::error::{BenchError, ExecutionError, SerializationError};
use macrobench_ipc::{
    FailureTree, Frame, FrameError, FrameReader, FrameWriter, IPC_FD_ENV, IterationResult,
    PROTOCOL_VERSION, SupervisorCommand, TrialPlan, WorkerCapabilities, WorkerMessage,
};
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Flag that switches the binary into worker mode.
pub const WORKER_FLAG: &str = "--worker";

/// How to start a worker process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Executable that understands [`WORKER_FLAG`]
    pub binary: PathBuf,
    /// Transport markers followed by the run's launch flags
    pub args: Vec<String>,
    /// Wall clock limit for one trial
    pub timeout: Option<Duration>,
}

/// How a trial ended, from the supervisor's point of view.
#[derive(Debug)]
pub enum TrialOutcome {
    /// Every iteration the worker ran, warmup included
    Completed(Vec<IterationResult>),
    /// The worker reported a failure tree
    Failed(FailureTree),
}

#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

fn wait_for_data(fd: RawFd, timeout_ms: i32) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    // SAFETY: one valid pollfd, count 1.
    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

    if result < 0 {
        PollResult::Error(std::io::Error::last_os_error())
    } else if result == 0 {
        PollResult::Timeout
    } else if pollfd.revents & libc::POLLIN != 0 {
        // Data may still be pending on a closing pipe.
        PollResult::DataAvailable
    } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        PollResult::PipeClosed
    } else {
        PollResult::Timeout
    }
}

/// Pipe pair `(read, write)`, both ends close-on-exec.
fn create_pipe() -> std::io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: fds has room for two descriptors.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    for &fd in &fds {
        // SAFETY: fd was just returned by pipe(2).
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

/// Move a child's pipe ends onto fds 3 and 4. Both are lifted above 4 first,
/// so a source already sitting on the other target is not clobbered.
/// Async-signal-safe.
fn install_worker_fds(cmd_read: RawFd, msg_write: RawFd) -> std::io::Result<()> {
    fn check(rc: libc::c_int) -> std::io::Result<libc::c_int> {
        if rc < 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(rc)
        }
    }
    // SAFETY: plain descriptor syscalls on fds owned by the calling process.
    unsafe {
        let cmd_high = check(libc::fcntl(cmd_read, libc::F_DUPFD_CLOEXEC, 5))?;
        let msg_high = check(libc::fcntl(msg_write, libc::F_DUPFD_CLOEXEC, 5))?;
        libc::close(cmd_read);
        libc::close(msg_write);
        // dup2 clears close-on-exec on the target
        check(libc::dup2(cmd_high, 3))?;
        check(libc::dup2(msg_high, 4))?;
        libc::close(cmd_high);
        libc::close(msg_high);
    }
    Ok(())
}

/// Wait for an exited or killed child, logging when it cannot be reaped.
fn reap(child: &mut Child) -> Option<std::process::ExitStatus> {
    match child.wait() {
        Ok(status) => {
            debug!(pid = child.id(), %status, "worker reaped");
            Some(status)
        }
        Err(e) => {
            warn!(pid = child.id(), error = %e, "could not reap worker");
            None
        }
    }
}

fn close_fd(fd: RawFd) {
    // SAFETY: only called on descriptors this module owns.
    unsafe {
        libc::close(fd);
    }
}

fn send_sigterm(pid: u32) {
    // SAFETY: kill(2) with a pid we spawned.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

/// A running worker process.
pub struct WorkerHandle {
    child: Child,
    reader: FrameReader<std::fs::File>,
    writer: FrameWriter<std::fs::File>,
    capabilities: WorkerCapabilities,
    timeout: Option<Duration>,
    msg_read_fd: RawFd,
}

impl WorkerHandle {
    /// Spawn a worker and wait for its handshake.
    pub fn launch(spec: &LaunchSpec) -> Result<Self, BenchError> {
        let (cmd_read, cmd_write) = create_pipe().map_err(ExecutionError::Launch)?;
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(ExecutionError::Launch(e).into());
            }
        };

        let mut command = Command::new(&spec.binary);
        command
            .arg(WORKER_FLAG)
            .args(&spec.args)
            .env(IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // SAFETY: only async-signal-safe libc calls between fork and exec.
        unsafe {
            command.pre_exec(move || {
                libc::close(cmd_write);
                libc::close(msg_read);
                install_worker_fds(cmd_read, msg_write)
            });
        }

        let spawned = command.spawn();
        close_fd(cmd_read);
        close_fd(msg_write);
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                close_fd(cmd_write);
                close_fd(msg_read);
                return Err(ExecutionError::Launch(e).into());
            }
        };

        // SAFETY: the parent-side ends are owned by nothing else from here on.
        let writer_file = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        let reader_file = unsafe { std::fs::File::from_raw_fd(msg_read) };

        let mut handle = Self {
            child,
            reader: FrameReader::new(reader_file),
            writer: FrameWriter::new(writer_file),
            capabilities: WorkerCapabilities::current(false, None),
            timeout: spec.timeout,
            msg_read_fd: msg_read,
        };
        handle.capabilities = handle.wait_for_hello()?;
        debug!(
            pid = handle.capabilities.pid,
            alloc_tracking = handle.capabilities.has_alloc_tracking,
            heap_limit = ?handle.capabilities.heap_limit,
            "worker ready"
        );
        Ok(handle)
    }

    fn wait_for_hello(&mut self) -> Result<WorkerCapabilities, BenchError> {
        match self.next_message(Instant::now())? {
            WorkerMessage::Hello(caps) if caps.protocol_version == PROTOCOL_VERSION => Ok(caps),
            WorkerMessage::Hello(caps) => Err(ExecutionError::Protocol {
                expected: format!("protocol version {PROTOCOL_VERSION}"),
                got: format!("protocol version {}", caps.protocol_version),
            }
            .into()),
            other => Err(ExecutionError::Protocol {
                expected: "Hello".to_string(),
                got: other.label().to_string(),
            }
            .into()),
        }
    }

    /// Capabilities announced in the handshake.
    pub fn capabilities(&self) -> &WorkerCapabilities {
        &self.capabilities
    }

    /// Run one trial and collect everything the worker reports.
    pub fn run_trial(&mut self, plan: &TrialPlan) -> Result<TrialOutcome, BenchError> {
        self.writer
            .write(&SupervisorCommand::Run { plan: plan.clone() })
            .map_err(frame_failure)?;

        let started = Instant::now();
        let mut iterations = Vec::new();
        loop {
            match self.next_message(started)? {
                WorkerMessage::Iteration(result) => iterations.push(result),
                WorkerMessage::Complete {
                    iterations: announced,
                    total_duration_nanos,
                } => {
                    if announced as usize != iterations.len() {
                        return Err(ExecutionError::Protocol {
                            expected: format!("{announced} iterations"),
                            got: format!("{} iterations", iterations.len()),
                        }
                        .into());
                    }
                    debug!(iterations = announced, total_duration_nanos, "trial complete");
                    return Ok(TrialOutcome::Completed(iterations));
                }
                WorkerMessage::Failure(tree) => return Ok(TrialOutcome::Failed(tree)),
                WorkerMessage::Hello(_) => {
                    return Err(ExecutionError::Protocol {
                        expected: "Iteration/Complete/Failure".to_string(),
                        got: "Hello".to_string(),
                    }
                    .into());
                }
            }
        }
    }

    /// Next message, watching for crashes and the trial timeout.
    fn next_message(&mut self, started: Instant) -> Result<WorkerMessage, BenchError> {
        loop {
            let remaining = match self.timeout {
                Some(limit) => {
                    let left = limit.saturating_sub(started.elapsed());
                    if left.is_zero() {
                        return Err(self.handle_timeout(limit));
                    }
                    left
                }
                None => Duration::from_millis(100),
            };

            // A buffered partial frame may never complete if the worker died.
            if self.reader.has_buffered_data() {
                if !self.is_alive() {
                    return Err(self.crashed("worker exited with a partial frame buffered"));
                }
            } else {
                let slice = remaining.min(Duration::from_millis(100));
                match wait_for_data(self.msg_read_fd, slice.as_millis() as i32) {
                    PollResult::DataAvailable => {}
                    PollResult::Timeout => {
                        if !self.is_alive() {
                            return Err(self.crashed("worker exited unexpectedly"));
                        }
                        continue;
                    }
                    PollResult::PipeClosed => {
                        return Err(self.crashed("worker pipe closed unexpectedly"));
                    }
                    PollResult::Error(e) => {
                        return Err(self.crashed(&format!("pipe error: {e}")));
                    }
                }
            }

            return match self.reader.read::<WorkerMessage>() {
                Ok(msg) => Ok(msg),
                Err(e) if e.is_disconnect() => {
                    Err(self.crashed(&format!("worker hung up mid-trial: {e}")))
                }
                Err(e) if !self.is_alive() => Err(self.crashed(&format!("worker died mid-frame: {e}"))),
                Err(e) => Err(frame_failure(e)),
            };
        }
    }

    fn crashed(&mut self, what: &str) -> BenchError {
        let status = match self.child.try_wait() {
            Ok(Some(status)) => format!(" ({status})"),
            _ => String::new(),
        };
        ExecutionError::Crashed(format!("{what}{status}")).into()
    }

    /// SIGTERM, a short grace period, then SIGKILL.
    fn handle_timeout(&mut self, limit: Duration) -> BenchError {
        warn!(pid = self.child.id(), ?limit, "worker timed out");
        send_sigterm(self.child.id());
        let deadline = Instant::now() + Duration::from_millis(500);
        while self.is_alive() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        self.kill();
        ExecutionError::Timeout(limit).into()
    }

    /// Ask the worker to exit and reap it.
    pub fn shutdown(mut self) -> Result<(), BenchError> {
        self.writer
            .write(&SupervisorCommand::Shutdown)
            .map_err(frame_failure)?;
        reap(&mut self.child);
        Ok(())
    }

    /// Block until the worker exits.
    pub fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait()
    }

    /// Whether the worker process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the worker immediately and reap it.
    pub fn kill(&mut self) {
        if self.is_alive() {
            if let Err(e) = self.child.kill() {
                warn!(pid = self.child.id(), error = %e, "could not kill worker");
            }
        }
        reap(&mut self.child);
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            send_sigterm(self.child.id());
            std::thread::sleep(Duration::from_millis(50));
            self.kill();
        }
    }
}

/// A hang-up is a crash, an oversized frame a protocol violation and a payload
/// that fails validation a serialization error.
fn frame_failure(e: FrameError) -> BenchError {
    match e {
        FrameError::TooLarge {
            stream,
            label,
            size,
            max,
        } => ExecutionError::Protocol {
            expected: format!("{stream} of at most {max} bytes"),
            got: format!("{label} of {size} bytes"),
        }
        .into(),
        FrameError::Malformed { stream, reason } => {
            SerializationError::Payload { stream, reason }.into()
        }
        FrameError::Encode { label, reason } => SerializationError::Command { label, reason }.into(),
        FrameError::Io { .. } | FrameError::Closed { .. } => {
            ExecutionError::Crashed(e.to_string()).into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_is_launch_error() {
        let spec = LaunchSpec {
            binary: PathBuf::from("/nonexistent/macrobench-worker"),
            args: Vec::new(),
            timeout: None,
        };
        match WorkerHandle::launch(&spec) {
            Err(BenchError::Execution(ExecutionError::Launch(_))) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("launch should fail"),
        }
    }

    #[test]
    fn test_silent_exit_is_crash() {
        // `true` ignores its arguments and exits without a handshake.
        let spec = LaunchSpec {
            binary: PathBuf::from("true"),
            args: Vec::new(),
            timeout: Some(Duration::from_secs(5)),
        };
        match WorkerHandle::launch(&spec) {
            Err(BenchError::Execution(ExecutionError::Crashed(_))) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("launch should fail"),
        }
    }

    /// Launch a shell script as the worker, retrying while the freshly
    /// written file is still busy in a concurrently forked test.
    fn launch_script(dir: &std::path::Path, body: &str) -> Result<WorkerHandle, BenchError> {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("worker.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let spec = LaunchSpec {
            binary: script,
            args: Vec::new(),
            timeout: Some(Duration::from_secs(5)),
        };
        for _ in 0..20 {
            match WorkerHandle::launch(&spec) {
                Err(BenchError::Execution(ExecutionError::Launch(e)))
                    if e.raw_os_error() == Some(libc::ETXTBSY) =>
                {
                    std::thread::sleep(Duration::from_millis(10));
                }
                other => return other,
            }
        }
        WorkerHandle::launch(&spec)
    }

    #[test]
    fn test_garbage_frame_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        // Eight-byte frame of 0xff, then stay alive
        let body = r"printf '\010\000\000\000\377\377\377\377\377\377\377\377' >&4; sleep 2";
        match launch_script(dir.path(), body) {
            Err(BenchError::Serialization(SerializationError::Payload { stream, .. })) => {
                assert_eq!(stream, "worker message");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("launch should fail"),
        }
    }

    #[test]
    fn test_hang_up_after_partial_frame_is_crash() {
        let dir = tempfile::tempdir().unwrap();
        // Length prefix announcing 32 bytes, then exit
        let body = r"printf '\040\000\000\000\000\000' >&4";
        match launch_script(dir.path(), body) {
            Err(BenchError::Execution(ExecutionError::Crashed(_))) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("launch should fail"),
        }
    }

    #[test]
    fn test_oversized_frame_is_protocol_error() {
        let err = frame_failure(FrameError::TooLarge {
            stream: "worker message",
            label: "frame",
            size: 1 << 30,
            max: 1024,
        });
        assert_eq!(
            err.to_string(),
            "worker protocol error: expected worker message of at most 1024 bytes, \
             got frame of 1073741824 bytes"
        );
    }

    #[test]
    fn test_closed_pipe_is_crash() {
        let err = frame_failure(FrameError::Closed {
            stream: "worker message",
        });
        match err {
            BenchError::Execution(ExecutionError::Crashed(what)) => {
                assert_eq!(what, "worker message: peer closed the pipe")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_worker_fds_survive_swapped_sources() {
        use std::io::{Read, Write};

        let (cmd_read, cmd_write) = create_pipe().unwrap();
        let (msg_read, msg_write) = create_pipe().unwrap();
        let mut command = Command::new("sh");
        command.args(["-c", "read line <&3 && echo \"$line\" >&4"]);
        // SAFETY: only fd syscalls between fork and exec.
        unsafe {
            command.pre_exec(move || {
                libc::close(cmd_write);
                libc::close(msg_read);
                // Land the command end on 4 and the message end on 3.
                let cmd_high = libc::fcntl(cmd_read, libc::F_DUPFD, 10);
                let msg_high = libc::fcntl(msg_write, libc::F_DUPFD, 10);
                libc::dup2(cmd_high, 4);
                libc::dup2(msg_high, 3);
                libc::close(cmd_high);
                libc::close(msg_high);
                install_worker_fds(4, 3)
            });
        }
        let mut child = command.spawn().unwrap();
        close_fd(cmd_read);
        close_fd(msg_write);

        let mut to_child = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        to_child.write_all(b"ping\n").unwrap();
        drop(to_child);
        let mut reply = String::new();
        unsafe { std::fs::File::from_raw_fd(msg_read) }
            .read_to_string(&mut reply)
            .unwrap();

        assert_eq!(reply, "ping\n");
        assert!(reap(&mut child).unwrap().success());
    }

    #[test]
    fn test_reap_twice() {
        let mut child = Command::new("true").spawn().unwrap();
        assert!(reap(&mut child).unwrap().success());
        // A reaped child keeps its status.
        assert!(reap(&mut child).unwrap().success());
    }

    #[test]
    fn test_poll_on_closed_pipe() {
        let (read, write) = create_pipe().unwrap();
        close_fd(write);
        assert!(matches!(wait_for_data(read, 10), PollResult::PipeClosed | PollResult::DataAvailable));
        close_fd(read);
    }
}
