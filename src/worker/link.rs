// SPDX-License-Identifier: PMPL-1.0-or-later

//! The seam between the stress loop and a live subject.

use crate::error::SessionError;
use crate::layout::OutputLayout;
use crate::session::{BestMove, Position, Session, SubjectCommand};
use std::thread;
use std::time::{Duration, Instant};

/// How long an exited subject's reader gets to reach end of stream.
const READER_SETTLE: Duration = Duration::from_millis(500);

/// What the stress loop needs from a running subject.
pub trait EngineLink {
    fn pid(&self) -> u32;

    /// Anomaly lines observed since the previous call.
    fn drain_anomalies(&mut self) -> Vec<String>;

    /// Exit status text once the subject has exited, after its output has settled.
    fn exited(&mut self) -> Option<String>;

    fn best_move(&mut self, state: &str, depth: u32, max_wait: Duration) -> Option<BestMove>;

    /// Resets the subject between iterations; false if it did not confirm.
    fn new_game(&mut self) -> bool;

    fn is_alive(&mut self) -> bool;

    fn recent_output(&self) -> Vec<String>;
}

impl EngineLink for Session {
    fn pid(&self) -> u32 {
        Session::pid(self)
    }

    fn drain_anomalies(&mut self) -> Vec<String> {
        Session::drain_anomalies(self).collect()
    }

    fn exited(&mut self) -> Option<String> {
        if let Some(status) = self.exit_status() {
            self.wait_for_reader(READER_SETTLE);
            return Some(status.to_string());
        }
        if !self.stream_closed() {
            return None;
        }
        // Output closed first; the exit status follows shortly.
        let deadline = Instant::now() + READER_SETTLE;
        while Instant::now() < deadline {
            if let Some(status) = self.exit_status() {
                return Some(status.to_string());
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }

    fn best_move(&mut self, state: &str, depth: u32, max_wait: Duration) -> Option<BestMove> {
        Session::best_move(self, Position::Fen(state), depth, max_wait)
    }

    fn new_game(&mut self) -> bool {
        Session::new_game(self)
    }

    fn is_alive(&mut self) -> bool {
        Session::is_alive(self)
    }

    fn recent_output(&self) -> Vec<String> {
        Session::recent_output(self)
    }
}

/// Starts subjects for a worker, initially and after a subject dies.
pub trait Launcher: Send {
    type Link: EngineLink;

    fn launch(&mut self, tag: &str) -> Result<Self::Link, SessionError>;
}

/// Launches real subject processes.
#[derive(Debug, Clone)]
pub struct SessionLauncher {
    command: SubjectCommand,
    layout: OutputLayout,
    handshake_timeout: Duration,
}

impl SessionLauncher {
    pub fn new(command: SubjectCommand, layout: OutputLayout, handshake_timeout: Duration) -> Self {
        Self {
            command,
            layout,
            handshake_timeout,
        }
    }
}

impl Launcher for SessionLauncher {
    type Link = Session;

    fn launch(&mut self, tag: &str) -> Result<Session, SessionError> {
        Session::start(&self.command, tag, &self.layout, self.handshake_timeout)
    }
}
