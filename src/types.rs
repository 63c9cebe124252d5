// SPDX-License-Identifier: PMPL-1.0-or-later

//! Core type definitions shared by the worker, capture pipeline and supervisor.

use crate::capture::DebuggerPolicy;
use crate::layout::OutputLayout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Stress run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressConfig {
    pub engine: PathBuf,
    #[serde(default)]
    pub engine_args: Vec<String>,
    /// Extra environment for the subject, on top of the inherited one.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub uci_options: BTreeMap<String, String>,
    pub workers: usize,
    /// Iterations per worker; 0 runs until interrupted.
    pub games: u64,
    pub depth: u32,
    pub max_moves: u32,
    pub mem_limit_mb: f64,
    pub spin: Duration,
    pub response_cap: Duration,
    pub handshake_timeout: Duration,
    pub layout: OutputLayout,
    #[serde(default)]
    pub debugger: DebuggerPolicy,
}

impl StressConfig {
    pub const DEFAULT_WORKERS: usize = 2;
    pub const DEFAULT_GAMES: u64 = 0;
    pub const DEFAULT_DEPTH: u32 = 12;
    pub const DEFAULT_MAX_MOVES: u32 = 100;
    pub const DEFAULT_MEM_LIMIT_MB: f64 = 2048.0;
    pub const DEFAULT_SPIN_SEC: f64 = 10.0;

    /// Configuration with the built-in defaults for `engine`.
    pub fn new(engine: impl Into<PathBuf>) -> Self {
        Self {
            engine: engine.into(),
            engine_args: Vec::new(),
            env: BTreeMap::new(),
            uci_options: BTreeMap::new(),
            workers: Self::DEFAULT_WORKERS,
            games: Self::DEFAULT_GAMES,
            depth: Self::DEFAULT_DEPTH,
            max_moves: Self::DEFAULT_MAX_MOVES,
            mem_limit_mb: Self::DEFAULT_MEM_LIMIT_MB,
            spin: Duration::from_secs_f64(Self::DEFAULT_SPIN_SEC),
            response_cap: crate::worker::DEFAULT_RESPONSE_CAP,
            handshake_timeout: crate::session::DEFAULT_HANDSHAKE_TIMEOUT,
            layout: OutputLayout::default(),
            debugger: DebuggerPolicy::Auto,
        }
    }
}

/// Why a crash report was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureReason {
    AnomalySignal,
    MemoryLimit,
    PossibleSpin,
    IllegalAction,
    ProcessExited,
}

impl CaptureReason {
    /// Note string written into the crash report.
    pub fn note(&self) -> &'static str {
        match self {
            CaptureReason::AnomalySignal => "anomaly signal",
            CaptureReason::MemoryLimit => "memory limit",
            CaptureReason::PossibleSpin => "possible spin",
            CaptureReason::IllegalAction => "illegal action",
            CaptureReason::ProcessExited => "process exited",
        }
    }
}

impl std::fmt::Display for CaptureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.note())
    }
}

/// Structured metadata captured at the moment a trigger fires.
///
/// Built once by the worker and handed by value to the capture pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashContext {
    /// Path of the monitored program.
    pub subject: PathBuf,
    pub worker: usize,
    pub iteration: u64,
    pub step: u32,
    pub pid: u32,
    /// Serialized domain state (a FEN for chess engines).
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CrashContext {
    /// Ordered `KEY: value` pairs for the report header.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("ENGINE_PATH", self.subject.display().to_string()),
            ("WORKER", self.worker.to_string()),
            ("GAME", self.iteration.to_string()),
            ("MOVE", self.step.to_string()),
            ("PID", self.pid.to_string()),
            ("FEN", self.state.clone()),
        ]
    }
}

/// Point-in-time resource usage of a subject process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub resident_bytes: u64,
    pub cpu_seconds: f64,
}

impl ResourceSample {
    pub fn resident_mb(&self) -> f64 {
        self.resident_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// How one iteration ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IterationOutcome {
    /// The oracle reported a terminal state.
    Finished { result: String },
    /// The step budget ran out before a terminal state.
    StepLimit,
    /// The subject offered the null action, or went quiet below the spin threshold.
    Inconclusive { detail: String },
    /// A trigger fired and a crash report was written.
    Captured {
        reason: CaptureReason,
        report: PathBuf,
    },
}

impl IterationOutcome {
    /// Short label used in transcript headers and logs.
    pub fn termination(&self) -> String {
        match self {
            IterationOutcome::Finished { .. } => "normal".to_string(),
            IterationOutcome::StepLimit => "step limit".to_string(),
            IterationOutcome::Inconclusive { detail } => format!("inconclusive: {}", detail),
            IterationOutcome::Captured { reason, .. } => reason.note().to_string(),
        }
    }
}

/// Per-worker tallies returned to the supervisor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker: usize,
    pub iterations: u64,
    pub triggers: u64,
    pub finished: u64,
    pub inconclusive: u64,
    pub step_limits: u64,
    pub failed_iterations: u64,
    pub crash_reports: Vec<PathBuf>,
    pub transcripts: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl WorkerSummary {
    pub fn new(worker: usize) -> Self {
        Self {
            worker,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: &IterationOutcome) {
        match outcome {
            IterationOutcome::Finished { .. } => self.finished += 1,
            IterationOutcome::StepLimit => self.step_limits += 1,
            IterationOutcome::Inconclusive { .. } => self.inconclusive += 1,
            IterationOutcome::Captured { report, .. } => {
                self.triggers += 1;
                self.crash_reports.push(report.clone());
            }
        }
    }
}

/// Whole-run summary produced by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressReport {
    pub engine: PathBuf,
    pub started_at: String,
    pub finished_at: String,
    pub interrupted: bool,
    pub workers: Vec<WorkerSummary>,
}

impl StressReport {
    pub fn total_iterations(&self) -> u64 {
        self.workers.iter().map(|w| w.iterations).sum()
    }

    pub fn total_triggers(&self) -> u64 {
        self.workers.iter().map(|w| w.triggers).sum()
    }
}
