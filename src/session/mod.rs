// SPDX-License-Identifier: PMPL-1.0-or-later

//! One subject process, its handshake, and its classified output stream.
//!
//! The subject's stdout and stderr share a single pipe. Exactly one reader
//! thread drains that pipe for the life of the process and fans each line
//! out to the raw log, the anomaly log/queue and the general reply queue.
//! The worker only ever touches the queues, never the stream.

pub mod protocol;

pub use protocol::{BestMove, Position};

use crate::error::SessionError;
use crate::layout::OutputLayout;
use crate::signatures;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryIter};
use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lines kept for diagnostics after the worker has consumed them.
const RECENT_LINES: usize = 64;

/// Bound on each handshake token.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `terminate` waits for a graceful exit before killing.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Everything needed to (re)launch a subject process.
#[derive(Debug, Clone, Default)]
pub struct SubjectCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Sent as `setoption` lines between `uciok` and the first `isready`.
    pub options: BTreeMap<String, String>,
}

impl SubjectCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }
}

pub struct Session {
    child: Child,
    pid: u32,
    tag: String,
    stdin: Option<ChildStdin>,
    lines: Receiver<String>,
    anomalies: Receiver<String>,
    reader: Option<JoinHandle<()>>,
    recent: VecDeque<String>,
    handshake_timeout: Duration,
    degraded: bool,
    terminated: bool,
}

impl Session {
    /// Launches the subject, starts its reader and performs the bring-up handshake.
    ///
    /// A handshake that never completes is logged and leaves the session in
    /// degraded mode; only a failed launch is an error.
    pub fn start(
        command: &SubjectCommand,
        tag: &str,
        layout: &OutputLayout,
        handshake_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let engine_log = open_append(&layout.engine_log(tag))?;
        let anomaly_log = open_append(&layout.anomaly_log(tag))?;

        let (output, output_writer) = std::io::pipe()?;
        let error_writer = output_writer.try_clone()?;

        // The Command holds the write ends; it must be dropped after spawning
        // so the reader sees EOF when the child exits.
        let spawned = {
            let mut process = Command::new(&command.program);
            process
                .args(&command.args)
                .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .stdin(Stdio::piped())
                .stdout(output_writer)
                .stderr(error_writer);
            process.spawn()
        };
        let mut child = spawned.map_err(|source| SessionError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let (line_tx, line_rx) = crossbeam_channel::unbounded();
        let (anomaly_tx, anomaly_rx) = crossbeam_channel::unbounded();

        let reader = thread::Builder::new()
            .name(format!("reader-{}", tag))
            .spawn({
                let tag = tag.to_string();
                move || read_output(&tag, output, engine_log, anomaly_log, line_tx, anomaly_tx)
            });
        let reader = match reader {
            Ok(handle) => handle,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SessionError::Io(err));
            }
        };

        let mut session = Self {
            child,
            pid,
            tag: tag.to_string(),
            stdin,
            lines: line_rx,
            anomalies: anomaly_rx,
            reader: Some(reader),
            recent: VecDeque::with_capacity(RECENT_LINES),
            handshake_timeout,
            degraded: false,
            terminated: false,
        };

        info!(tag, pid, program = %command.program.display(), "subject started");
        if !session.handshake(&command.options) {
            session.degraded = true;
            warn!(tag, pid, "handshake incomplete, continuing in degraded mode");
        }
        Ok(session)
    }

    fn handshake(&mut self, options: &BTreeMap<String, String>) -> bool {
        let timeout = self.handshake_timeout;
        let _ = self.request(protocol::UCI);
        let mut complete = self.await_token(protocol::UCI_OK, timeout);
        for (name, value) in options {
            let _ = self.request(&protocol::set_option(name, value));
        }
        let _ = self.request(protocol::IS_READY);
        complete &= self.await_token(protocol::READY_OK, timeout);
        complete & self.new_game()
    }

    /// Resets engine state between iterations (`ucinewgame` + ready round-trip).
    pub fn new_game(&mut self) -> bool {
        if self.request(protocol::NEW_GAME).is_err() || self.request(protocol::IS_READY).is_err() {
            return false;
        }
        self.await_token(protocol::READY_OK, self.handshake_timeout)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// True when a handshake token never arrived.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    /// Writes one protocol line to the subject.
    pub fn request(&mut self, line: &str) -> Result<(), SessionError> {
        let closed = || SessionError::Closed {
            tag: self.tag.clone(),
        };
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(closed());
        };
        debug!(tag = %self.tag, line, "-> subject");
        let written = stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush());
        match written {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                self.stdin = None;
                Err(closed())
            }
            Err(err) => Err(SessionError::Io(err)),
        }
    }

    /// Consumes output until a line satisfies `predicate` or `timeout` passes.
    ///
    /// Non-matching lines are discarded. Returns `None` on timeout or once the
    /// output stream has closed and every queued line has been seen.
    pub fn await_response<P>(&mut self, predicate: P, timeout: Duration) -> Option<String>
    where
        P: Fn(&str) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            match self.lines.recv_deadline(deadline) {
                Ok(line) => {
                    let matched = predicate(&line);
                    self.remember(line.clone());
                    if matched {
                        return Some(line);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }

    fn await_token(&mut self, token: &str, timeout: Duration) -> bool {
        self.await_response(|line| protocol::has_token(line, token), timeout)
            .is_some()
    }

    /// Asks for a move in `position` and waits up to `max_wait` for `bestmove`.
    pub fn best_move(
        &mut self,
        position: Position<'_>,
        depth: u32,
        max_wait: Duration,
    ) -> Option<BestMove> {
        self.request(&position.command()).ok()?;
        self.request(&protocol::go_depth(depth)).ok()?;
        self.await_response(BestMove::is_reply, max_wait)
            .and_then(|line| BestMove::parse(&line))
    }

    /// Returns and clears every anomaly line observed so far.
    ///
    /// Each call starts from whatever has accumulated since the previous one.
    pub fn drain_anomalies(&self) -> TryIter<'_, String> {
        self.anomalies.try_iter()
    }

    /// Tail of the output the worker has consumed, oldest first.
    pub fn recent_output(&self) -> Vec<String> {
        self.recent.iter().cloned().collect()
    }

    fn remember(&mut self, line: String) {
        if self.recent.len() == RECENT_LINES {
            self.recent.pop_front();
        }
        self.recent.push_back(line);
    }

    /// Exit status if the subject has already exited.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// False once the subject has exited or its input pipe is known closed.
    pub fn is_alive(&mut self) -> bool {
        !self.terminated && self.stdin.is_some() && self.exit_status().is_none()
    }

    /// True once the reader has seen end of stream.
    pub fn stream_closed(&self) -> bool {
        self.reader
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }

    /// Waits up to `timeout` for the reader to reach end of stream.
    pub fn wait_for_reader(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match &self.reader {
                None => return true,
                Some(handle) if handle.is_finished() => {
                    if let Some(handle) = self.reader.take() {
                        let _ = handle.join();
                    }
                    return true;
                }
                Some(_) if Instant::now() >= deadline => return false,
                Some(_) => thread::sleep(Duration::from_millis(10)),
            }
        }
    }

    /// Best-effort shutdown: `quit`, then a termination request, then reap.
    ///
    /// Never fails; problems are only logged.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        let _ = self.request(protocol::QUIT);
        self.stdin = None;

        if let Err(err) = request_termination(&mut self.child) {
            debug!(tag = %self.tag, %err, "termination request failed");
        }

        let deadline = Instant::now() + TERMINATE_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(tag = %self.tag, %status, "subject exited");
                    break;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                Ok(None) => {
                    if let Err(err) = self.child.kill() {
                        warn!(tag = %self.tag, %err, "failed to kill subject");
                    }
                    if let Err(err) = self.child.wait() {
                        warn!(tag = %self.tag, %err, "failed to reap subject");
                    }
                    break;
                }
                Err(err) => {
                    warn!(tag = %self.tag, %err, "failed to poll subject");
                    break;
                }
            }
        }
        self.wait_for_reader(Duration::from_millis(500));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if child.try_wait()?.is_some() {
        return Ok(());
    }
    let pid = i32::try_from(child.id()).map_err(std::io::Error::other)?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> std::io::Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }
    child.kill()
}

fn open_append(path: &Path) -> Result<File, SessionError> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Body of the reader thread; returns at end of stream.
///
/// Log write failures never stop the queues. Only the first one is reported.
fn read_output<R, W>(
    tag: &str,
    output: R,
    mut engine_log: W,
    mut anomaly_log: W,
    lines: Sender<String>,
    anomalies: Sender<String>,
) where
    R: Read,
    W: Write,
{
    let mut reader = BufReader::new(output);
    let mut buf = Vec::new();
    let mut log_failed = false;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(tag, %err, "subject output read failed");
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        let mut logged = writeln!(engine_log, "{}", line);
        if let Some(signature) = signatures::classify(&line) {
            debug!(kind = ?signature.kind, "anomaly line");
            logged = logged.and(writeln!(anomaly_log, "{}", line));
            let _ = anomalies.send(line.clone());
        }
        if let Err(err) = logged {
            if !log_failed {
                warn!(tag, %err, "subject output log write failed");
                log_failed = true;
            }
        }
        let _ = lines.send(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Writer standing in for a full disk.
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("no space left on device"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failing_logs_do_not_starve_the_queues() {
        let output = Cursor::new(
            "uciok\n==3==ERROR: AddressSanitizer: heap-use-after-free\nbestmove e2e4\n",
        );
        let (line_tx, line_rx) = crossbeam_channel::unbounded();
        let (anomaly_tx, anomaly_rx) = crossbeam_channel::unbounded();

        read_output("full", output, FullDisk, FullDisk, line_tx, anomaly_tx);

        let lines: Vec<String> = line_rx.try_iter().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "bestmove e2e4");
        let anomalies: Vec<String> = anomaly_rx.try_iter().collect();
        assert_eq!(anomalies.len(), 1);
        assert!(anomalies[0].contains("heap-use-after-free"));
    }
}
