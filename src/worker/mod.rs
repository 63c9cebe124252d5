// SPDX-License-Identifier: PMPL-1.0-or-later

//! The stress loop: repeated iterations against one subject.
//!
//! Per step the checks run in a fixed order: anomaly queue, process exit,
//! resource sample, action request, legality. The first check that fires
//! writes a crash report and ends the iteration. A step that ends the
//! iteration without firing drains the anomaly queue once more before it
//! returns. Every iteration, however it ends, leaves a transcript behind.

mod link;

pub use link::{EngineLink, Launcher, SessionLauncher};

use crate::capture::CrashCapture;
use crate::error::SampleError;
use crate::oracle::RulesOracle;
use crate::sampler::{ProcessSampler, ResourceProbe};
use crate::session::BestMove;
use crate::transcript::{PgnWriter, Transcript, TranscriptSink};
use crate::types::{CaptureReason, CrashContext, IterationOutcome, WorkerSummary};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Upper bound on a single `bestmove` wait.
pub const DEFAULT_RESPONSE_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Path of the subject, recorded in crash contexts.
    pub subject: PathBuf,
    /// Iterations to run; 0 runs until stopped.
    pub games: u64,
    pub depth: u32,
    pub max_moves: u32,
    pub mem_limit_mb: f64,
    pub spin: Duration,
    pub response_cap: Duration,
}

impl WorkerConfig {
    fn subject_name(&self) -> String {
        self.subject
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.subject.display().to_string())
    }
}

/// Where in the run a trigger fired.
struct Step<'a, S> {
    iteration: u64,
    step: u32,
    state: &'a S,
}

pub struct StressWorker<O: RulesOracle, L: Launcher> {
    id: usize,
    config: WorkerConfig,
    oracle: O,
    launcher: L,
    capture: CrashCapture,
    probe: Box<dyn ResourceProbe>,
    transcripts: Box<dyn TranscriptSink>,
    stop: Arc<AtomicBool>,
    launches: u32,
}

impl<O: RulesOracle, L: Launcher> StressWorker<O, L> {
    pub fn new(
        id: usize,
        config: WorkerConfig,
        oracle: O,
        launcher: L,
        capture: CrashCapture,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let transcripts = Box::new(PgnWriter::new(capture.layout().clone()));
        Self {
            id,
            config,
            oracle,
            launcher,
            capture,
            probe: Box::new(ProcessSampler),
            transcripts,
            stop,
            launches: 0,
        }
    }

    pub fn with_probe(mut self, probe: Box<dyn ResourceProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_transcripts(mut self, transcripts: Box<dyn TranscriptSink>) -> Self {
        self.transcripts = transcripts;
        self
    }

    /// Runs iterations until the game limit, the stop flag, or a failed launch.
    pub fn run(mut self) -> WorkerSummary {
        let mut summary = WorkerSummary::new(self.id);
        let mut link = match self.launch() {
            Ok(link) => link,
            Err(err) => {
                error!(worker = self.id, "{:#}", err);
                summary.aborted = Some(format!("{:#}", err));
                return summary;
            }
        };

        let mut iteration = 0u64;
        while !self.stop.load(Ordering::Relaxed)
            && (self.config.games == 0 || iteration < self.config.games)
        {
            iteration += 1;

            if iteration > 1 && link.is_alive() && !link.new_game() {
                warn!(worker = self.id, iteration, "subject did not confirm new game");
            }
            // A failed reset may be the first write to notice closed input.
            if !link.is_alive() {
                warn!(worker = self.id, iteration, "subject is gone, restarting");
                match self.launch() {
                    Ok(fresh) => link = fresh,
                    Err(err) => {
                        error!(worker = self.id, "{:#}", err);
                        summary.aborted = Some(format!("{:#}", err));
                        break;
                    }
                }
            }

            let mut transcript =
                Transcript::new(self.id, iteration, self.config.subject_name());
            match self.play(&mut link, iteration, &mut transcript) {
                Ok(outcome) => {
                    info!(
                        worker = self.id,
                        iteration,
                        moves = transcript.moves.len(),
                        "[w{}] g{} ended: {}",
                        self.id,
                        iteration,
                        outcome.termination()
                    );
                    if let IterationOutcome::Finished { result } = &outcome {
                        transcript.result = result.clone();
                    }
                    transcript.termination = outcome.termination();
                    summary.record(&outcome);
                }
                Err(err) => {
                    error!(worker = self.id, iteration, "iteration failed: {:?}", err);
                    transcript.termination = "harness error".to_string();
                    summary.failed_iterations += 1;
                }
            }
            summary.iterations += 1;

            match self.transcripts.persist(&transcript) {
                Ok(path) => summary.transcripts.push(path),
                Err(err) => warn!(worker = self.id, iteration, "{:#}", err),
            }
        }

        info!(
            worker = self.id,
            iterations = summary.iterations,
            triggers = summary.triggers,
            "worker finished"
        );
        summary
    }

    fn launch(&mut self) -> Result<L::Link> {
        self.launches += 1;
        let tag = format!("w{}_{}_{}", self.id, Utc::now().timestamp(), self.launches);
        self.launcher
            .launch(&tag)
            .with_context(|| format!("worker {} could not start {}", self.id, tag))
    }

    fn play(
        &mut self,
        link: &mut L::Link,
        iteration: u64,
        transcript: &mut Transcript,
    ) -> Result<IterationOutcome> {
        let mut state = self.oracle.new_state();
        let mut last_response = Instant::now();

        for step in 1..=self.config.max_moves {
            let at = Step {
                iteration,
                step,
                state: &state,
            };

            let anomalies = link.drain_anomalies();
            if !anomalies.is_empty() {
                let diagnostic = anomalies.join("\n");
                return Ok(self.trigger(link, &at, CaptureReason::AnomalySignal, &diagnostic, None));
            }
            if let Some(outcome) = self.check_exit(link, &at) {
                return Ok(outcome);
            }

            match self.probe.sample(link.pid()) {
                Ok(sample) => {
                    let rss_mb = sample.resident_mb();
                    debug!(
                        worker = self.id,
                        iteration,
                        step,
                        pid = link.pid(),
                        rss_mb,
                        cpu = sample.cpu_seconds,
                        "[w{}] g{} m{} rss {:.1}MB thr_cpu {:.2}s",
                        self.id,
                        iteration,
                        step,
                        rss_mb,
                        sample.cpu_seconds
                    );
                    if rss_mb > self.config.mem_limit_mb {
                        let diagnostic = format!(
                            "MEMORY LIMIT EXCEEDED: {:.1} MB > {:.1} MB",
                            rss_mb, self.config.mem_limit_mb
                        );
                        return Ok(self.trigger(link, &at, CaptureReason::MemoryLimit, &diagnostic, None));
                    }
                }
                Err(SampleError::Unavailable { pid }) => {
                    debug!(worker = self.id, pid, "resource sample unavailable");
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("sampling pid {}", link.pid()));
                }
            }

            let fen = self.oracle.serialize(&state);
            let spin_left = self.config.spin.saturating_sub(last_response.elapsed());
            let wait = self.config.response_cap.min(spin_left);
            let action = match link.best_move(&fen, self.config.depth, wait) {
                Some(BestMove::Move(action)) => {
                    last_response = Instant::now();
                    action
                }
                Some(BestMove::Null) => {
                    let outcome = IterationOutcome::Inconclusive {
                        detail: "null move".to_string(),
                    };
                    return Ok(self.settle(link, &at, outcome));
                }
                None => {
                    if let Some(outcome) = self.check_exit(link, &at) {
                        return Ok(outcome);
                    }
                    let silent = last_response.elapsed();
                    if silent < self.config.spin {
                        let outcome = IterationOutcome::Inconclusive {
                            detail: "no response".to_string(),
                        };
                        return Ok(self.settle(link, &at, outcome));
                    }
                    let mut lines = link.drain_anomalies();
                    let reason = if lines.is_empty() {
                        CaptureReason::PossibleSpin
                    } else {
                        CaptureReason::AnomalySignal
                    };
                    lines.push(format!("NO BESTMOVE for {:.1}s", silent.as_secs_f64()));
                    lines.extend(link.recent_output());
                    return Ok(self.trigger(link, &at, reason, &lines.join("\n"), None));
                }
            };

            if !self.oracle.legal_actions(&state).contains(&action) {
                let detail = format!("engine answered {}", action);
                let diagnostic = format!("ILLEGAL MOVE: {}", action);
                return Ok(self.trigger(link, &at, CaptureReason::IllegalAction, &diagnostic, Some(detail)));
            }
            let notation = self.oracle.notation(&state, &action);
            let next = match self.oracle.apply(&state, &action) {
                Ok(next) => next,
                Err(err) => {
                    let diagnostic = format!("ILLEGAL MOVE: {}", action);
                    return Ok(self.trigger(
                        link,
                        &at,
                        CaptureReason::IllegalAction,
                        &diagnostic,
                        Some(err.to_string()),
                    ));
                }
            };
            transcript.moves.push(notation);

            if self.oracle.is_terminal(&next) {
                let outcome = IterationOutcome::Finished {
                    result: self.oracle.result(&next),
                };
                return Ok(self.settle(link, &at, outcome));
            }
            if step == self.config.max_moves {
                return Ok(self.settle(link, &at, IterationOutcome::StepLimit));
            }
            state = next;
        }

        Ok(IterationOutcome::StepLimit)
    }

    /// Ends an iteration that fired no check; anomaly lines that arrived
    /// with the final reply are still captured at this step.
    fn settle(
        &self,
        link: &mut L::Link,
        at: &Step<'_, O::State>,
        outcome: IterationOutcome,
    ) -> IterationOutcome {
        let anomalies = link.drain_anomalies();
        if anomalies.is_empty() {
            return outcome;
        }
        let diagnostic = anomalies.join("\n");
        self.trigger(
            link,
            at,
            CaptureReason::AnomalySignal,
            &diagnostic,
            Some(outcome.termination()),
        )
    }

    /// Handles a subject that has exited; anomaly output it left behind wins.
    fn check_exit(&self, link: &mut L::Link, at: &Step<'_, O::State>) -> Option<IterationOutcome> {
        let status = link.exited()?;
        let anomalies = link.drain_anomalies();
        if !anomalies.is_empty() {
            let diagnostic = anomalies.join("\n");
            return Some(self.trigger(link, at, CaptureReason::AnomalySignal, &diagnostic, Some(status)));
        }
        let mut diagnostic = format!("PROCESS EXITED: {}", status);
        for line in link.recent_output() {
            diagnostic.push('\n');
            diagnostic.push_str(&line);
        }
        Some(self.trigger(link, at, CaptureReason::ProcessExited, &diagnostic, Some(status)))
    }

    fn trigger(
        &self,
        link: &L::Link,
        at: &Step<'_, O::State>,
        reason: CaptureReason,
        diagnostic: &str,
        detail: Option<String>,
    ) -> IterationOutcome {
        let pid = link.pid();
        let context = CrashContext {
            subject: self.config.subject.clone(),
            worker: self.id,
            iteration: at.iteration,
            step: at.step,
            pid,
            state: self.oracle.serialize(at.state),
            note: detail,
        };
        warn!(
            worker = self.id,
            iteration = at.iteration,
            step = at.step,
            pid,
            "[w{}] {} at g{} m{}",
            self.id,
            reason,
            at.iteration,
            at.step
        );
        let report = self
            .capture
            .capture_crash(context, diagnostic, Some(pid), reason.note());
        IterationOutcome::Captured { reason, report }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CoreLocator, DebuggerPolicy, Platform};
    use crate::error::{OracleError, SessionError};
    use crate::layout::OutputLayout;
    use crate::oracle::{ChessOracle, ChessState};
    use crate::types::ResourceSample;
    use std::collections::{BTreeSet, VecDeque};
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// One scripted step. An `Anomaly` right after a reply arrives with it.
    #[derive(Clone)]
    enum Reply {
        Move(&'static str),
        Null,
        Silent,
        Anomaly(&'static str),
        Exit(&'static str),
    }

    #[derive(Default)]
    struct Counters {
        requests: AtomicUsize,
        launches: AtomicUsize,
    }

    struct FakeLink {
        script: VecDeque<Reply>,
        pending_anomalies: Vec<String>,
        exit: Option<String>,
        alive: bool,
        counters: Arc<Counters>,
    }

    impl EngineLink for FakeLink {
        fn pid(&self) -> u32 {
            4242
        }

        fn drain_anomalies(&mut self) -> Vec<String> {
            if let Some(Reply::Anomaly(line)) = self.script.front().cloned() {
                self.script.pop_front();
                self.pending_anomalies.push(line.to_string());
            }
            std::mem::take(&mut self.pending_anomalies)
        }

        fn exited(&mut self) -> Option<String> {
            if let Some(Reply::Exit(status)) = self.script.front().cloned() {
                self.script.pop_front();
                self.exit = Some(status.to_string());
                self.alive = false;
            }
            self.exit.clone()
        }

        fn best_move(&mut self, _state: &str, _depth: u32, max_wait: Duration) -> Option<BestMove> {
            self.counters.requests.fetch_add(1, Ordering::SeqCst);
            let reply = match self.script.pop_front() {
                Some(Reply::Move(action)) => Some(BestMove::Move(action.to_string())),
                Some(Reply::Null) => Some(BestMove::Null),
                _ => {
                    std::thread::sleep(max_wait);
                    None
                }
            };
            while let Some(Reply::Anomaly(line)) = self.script.front().cloned() {
                self.script.pop_front();
                self.pending_anomalies.push(line.to_string());
            }
            reply
        }

        fn new_game(&mut self) -> bool {
            true
        }

        fn is_alive(&mut self) -> bool {
            self.alive
        }

        fn recent_output(&self) -> Vec<String> {
            vec!["info depth 1".to_string()]
        }
    }

    struct FakeLauncher {
        scripts: VecDeque<Vec<Reply>>,
        counters: Arc<Counters>,
    }

    impl Launcher for FakeLauncher {
        type Link = FakeLink;

        fn launch(&mut self, tag: &str) -> Result<FakeLink, SessionError> {
            self.counters.launches.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.pop_front().ok_or_else(|| SessionError::Closed {
                tag: tag.to_string(),
            })?;
            Ok(FakeLink {
                script: script.into(),
                pending_anomalies: Vec::new(),
                exit: None,
                alive: true,
                counters: self.counters.clone(),
            })
        }
    }

    struct FixedProbe(u64);

    impl ResourceProbe for FixedProbe {
        fn sample(&self, _pid: u32) -> Result<ResourceSample, SampleError> {
            Ok(ResourceSample {
                resident_bytes: self.0,
                cpu_seconds: 0.5,
            })
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<Transcript>>>);

    impl TranscriptSink for RecordingSink {
        fn persist(&self, transcript: &Transcript) -> Result<PathBuf> {
            let mut seen = self.0.lock().unwrap();
            seen.push(transcript.clone());
            Ok(PathBuf::from(format!("g{}.pgn", seen.len())))
        }
    }

    /// Chess rules that count how often `apply` runs.
    #[derive(Default)]
    struct CountingOracle {
        inner: ChessOracle,
        applied: Arc<AtomicUsize>,
    }

    impl RulesOracle for CountingOracle {
        type State = ChessState;

        fn new_state(&self) -> ChessState {
            self.inner.new_state()
        }

        fn legal_actions(&self, state: &ChessState) -> BTreeSet<String> {
            self.inner.legal_actions(state)
        }

        fn apply(&self, state: &ChessState, action: &str) -> Result<ChessState, OracleError> {
            self.applied.fetch_add(1, Ordering::SeqCst);
            self.inner.apply(state, action)
        }

        fn is_terminal(&self, state: &ChessState) -> bool {
            self.inner.is_terminal(state)
        }

        fn serialize(&self, state: &ChessState) -> String {
            self.inner.serialize(state)
        }

        fn result(&self, state: &ChessState) -> String {
            self.inner.result(state)
        }

        fn notation(&self, state: &ChessState, action: &str) -> String {
            self.inner.notation(state, action)
        }
    }

    struct Harness {
        dir: TempDir,
        counters: Arc<Counters>,
        sink: RecordingSink,
        applied: Arc<AtomicUsize>,
    }

    fn config(games: u64) -> WorkerConfig {
        WorkerConfig {
            subject: PathBuf::from("/opt/engines/fake"),
            games,
            depth: 4,
            max_moves: 100,
            mem_limit_mb: 2048.0,
            spin: Duration::from_secs(10),
            response_cap: DEFAULT_RESPONSE_CAP,
        }
    }

    fn worker(
        config: WorkerConfig,
        scripts: Vec<Vec<Reply>>,
        rss_bytes: u64,
    ) -> (StressWorker<CountingOracle, FakeLauncher>, Harness) {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::under(dir.path());
        layout.ensure().unwrap();
        let locator = CoreLocator::new(Platform::current(), dir.path()).working_dir_only();
        let capture = CrashCapture::new(layout, locator, DebuggerPolicy::Disabled);

        let counters = Arc::new(Counters::default());
        let sink = RecordingSink::default();
        let oracle = CountingOracle::default();
        let applied = oracle.applied.clone();
        let launcher = FakeLauncher {
            scripts: scripts.into(),
            counters: counters.clone(),
        };
        let worker = StressWorker::new(
            0,
            config,
            oracle,
            launcher,
            capture,
            Arc::new(AtomicBool::new(false)),
        )
        .with_probe(Box::new(FixedProbe(rss_bytes)))
        .with_transcripts(Box::new(sink.clone()));

        let harness = Harness {
            dir,
            counters,
            sink,
            applied,
        };
        (worker, harness)
    }

    const SMALL_RSS: u64 = 64 * 1024 * 1024;

    fn report_body(summary: &WorkerSummary) -> String {
        fs::read_to_string(&summary.crash_reports[0]).unwrap()
    }

    #[test]
    fn memory_limit_ends_iteration_before_any_request() {
        let (worker, harness) = worker(config(1), vec![vec![Reply::Move("e2e4")]], 3000 * 1024 * 1024);
        let summary = worker.run();

        assert_eq!(summary.triggers, 1);
        assert_eq!(harness.counters.requests.load(Ordering::SeqCst), 0);
        let body = report_body(&summary);
        assert!(body.contains("Note: memory limit"));
        assert!(body.contains("MEMORY LIMIT EXCEEDED: 3000.0 MB > 2048.0 MB"));
        assert!(summary.crash_reports[0].starts_with(harness.dir.path()));
    }

    #[test]
    fn illegal_action_is_captured_and_never_applied() {
        let script = vec![Reply::Move("e2e4"), Reply::Move("e2e4")];
        let (worker, harness) = worker(config(1), vec![script], SMALL_RSS);
        let summary = worker.run();

        assert_eq!(summary.triggers, 1);
        assert_eq!(harness.applied.load(Ordering::SeqCst), 1);
        let body = report_body(&summary);
        assert!(body.contains("Note: illegal action"));
        assert!(body.contains("MOVE: 2"));
        assert!(body.contains("FEN: rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"));
        assert!(body.contains("Detail: engine answered e2e4"));

        let transcripts = harness.sink.0.lock().unwrap();
        assert_eq!(transcripts[0].moves, vec!["e4".to_string()]);
        assert_eq!(transcripts[0].termination, "illegal action");
    }

    #[test]
    fn unparseable_action_counts_as_illegal() {
        let (worker, harness) = worker(config(1), vec![vec![Reply::Move("zz99")]], SMALL_RSS);
        let summary = worker.run();
        assert!(report_body(&summary).contains("Note: illegal action"));
        assert_eq!(harness.applied.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn silence_past_the_spin_threshold_is_a_possible_spin() {
        let mut cfg = config(1);
        cfg.spin = Duration::from_millis(300);
        let (worker, _harness) = worker(cfg, vec![vec![Reply::Move("e2e4"), Reply::Silent]], SMALL_RSS);

        let started = Instant::now();
        let summary = worker.run();
        let elapsed = started.elapsed();

        assert_eq!(summary.triggers, 1);
        assert!(report_body(&summary).contains("Note: possible spin"));
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn null_move_ends_the_iteration_without_a_report() {
        let (worker, harness) = worker(config(1), vec![vec![Reply::Move("e2e4"), Reply::Null]], SMALL_RSS);
        let summary = worker.run();

        assert_eq!(summary.triggers, 0);
        assert_eq!(summary.inconclusive, 1);
        assert!(summary.crash_reports.is_empty());
        let transcripts = harness.sink.0.lock().unwrap();
        assert_eq!(transcripts[0].termination, "inconclusive: null move");
        assert_eq!(transcripts[0].result, "*");
    }

    #[test]
    fn anomaly_is_reported_within_the_same_step() {
        let script = vec![
            Reply::Move("e2e4"),
            Reply::Anomaly("==7==ERROR: AddressSanitizer: heap-use-after-free"),
            Reply::Move("e7e5"),
        ];
        let (worker, harness) = worker(config(1), vec![script], SMALL_RSS);
        let summary = worker.run();

        assert_eq!(summary.triggers, 1);
        assert_eq!(harness.counters.requests.load(Ordering::SeqCst), 1);
        let body = report_body(&summary);
        assert!(body.contains("Note: anomaly signal"));
        assert!(body.contains("MOVE: 2"));
        assert!(body.contains("heap-use-after-free"));
    }

    #[test]
    fn anomaly_arriving_with_a_null_move_is_captured() {
        let script = vec![
            Reply::Move("e2e4"),
            Reply::Null,
            Reply::Anomaly("==7==ERROR: AddressSanitizer: heap-use-after-free"),
        ];
        let (worker, harness) = worker(config(1), vec![script], SMALL_RSS);
        let summary = worker.run();

        assert_eq!(summary.triggers, 1);
        assert_eq!(summary.inconclusive, 0);
        let body = report_body(&summary);
        assert!(body.contains("Note: anomaly signal"));
        assert!(body.contains("MOVE: 2"));
        assert!(body.contains("Detail: inconclusive: null move"));
        assert!(body.contains("heap-use-after-free"));
        assert_eq!(harness.sink.0.lock().unwrap()[0].termination, "anomaly signal");
    }

    #[test]
    fn anomaly_arriving_with_the_last_allowed_reply_is_captured() {
        let mut cfg = config(1);
        cfg.max_moves = 1;
        let script = vec![
            Reply::Move("e2e4"),
            Reply::Anomaly("==7==ERROR: AddressSanitizer: heap-buffer-overflow"),
        ];
        let (worker, _harness) = worker(cfg, vec![script], SMALL_RSS);
        let summary = worker.run();

        assert_eq!(summary.triggers, 1);
        assert_eq!(summary.step_limits, 0);
        let body = report_body(&summary);
        assert!(body.contains("MOVE: 1"));
        assert!(body.contains("FEN: rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"));
        assert!(body.contains("heap-buffer-overflow"));
    }

    #[test]
    fn anomaly_arriving_with_a_mating_reply_is_captured() {
        let script = vec![
            Reply::Move("f2f3"),
            Reply::Move("e7e5"),
            Reply::Move("g2g4"),
            Reply::Move("d8h4"),
            Reply::Anomaly("SIGABRT in search thread"),
        ];
        let (worker, _harness) = worker(config(1), vec![script], SMALL_RSS);
        let summary = worker.run();

        assert_eq!(summary.finished, 0);
        assert_eq!(summary.triggers, 1);
        let body = report_body(&summary);
        assert!(body.contains("MOVE: 4"));
        assert!(body.contains("Detail: normal"));
    }

    #[test]
    fn anomaly_during_silence_is_reported_with_the_spin_diagnostic() {
        let mut cfg = config(1);
        cfg.spin = Duration::from_millis(200);
        let script = vec![
            Reply::Silent,
            Reply::Anomaly("==7==ERROR: AddressSanitizer: stack-buffer-overflow"),
        ];
        let (worker, _harness) = worker(cfg, vec![script], SMALL_RSS);
        let summary = worker.run();

        assert_eq!(summary.triggers, 1);
        let body = report_body(&summary);
        assert!(body.contains("Note: anomaly signal"));
        assert!(body.contains("stack-buffer-overflow"));
        assert!(body.contains("NO BESTMOVE for"));
    }

    #[test]
    fn exited_subject_is_captured_and_restarted() {
        let first = vec![Reply::Move("e2e4"), Reply::Exit("signal: 11 (SIGSEGV)")];
        let second = vec![Reply::Null];
        let (worker, harness) = worker(config(2), vec![first, second], SMALL_RSS);
        let summary = worker.run();

        assert_eq!(summary.iterations, 2);
        assert_eq!(summary.triggers, 1);
        assert_eq!(harness.counters.launches.load(Ordering::SeqCst), 2);
        let body = report_body(&summary);
        assert!(body.contains("Note: process exited"));
        assert!(body.contains("SIGSEGV"));
    }

    #[test]
    fn failed_restart_stops_the_worker() {
        let first = vec![Reply::Exit("exit status: 1")];
        let (worker, _harness) = worker(config(0), vec![first], SMALL_RSS);
        let summary = worker.run();

        assert_eq!(summary.iterations, 1);
        assert!(summary.aborted.is_some());
    }

    #[test]
    fn every_iteration_leaves_a_transcript() {
        let scripts = vec![vec![Reply::Move("e2e4"), Reply::Null, Reply::Null, Reply::Null]];
        let (worker, harness) = worker(config(3), scripts, SMALL_RSS);
        let summary = worker.run();

        assert_eq!(summary.iterations, 3);
        assert_eq!(summary.transcripts.len(), 3);
        let transcripts = harness.sink.0.lock().unwrap();
        let rounds: Vec<u64> = transcripts.iter().map(|t| t.iteration).collect();
        assert_eq!(rounds, vec![1, 2, 3]);
    }

    #[test]
    fn step_budget_ends_long_iterations() {
        let mut cfg = config(1);
        cfg.max_moves = 2;
        let script = vec![Reply::Move("g1f3"), Reply::Move("g8f6"), Reply::Move("f3g1")];
        let (worker, harness) = worker(cfg, vec![script], SMALL_RSS);
        let summary = worker.run();

        assert_eq!(summary.step_limits, 1);
        assert_eq!(harness.sink.0.lock().unwrap()[0].moves, vec!["Nf3", "Nf6"]);
    }

    #[test]
    fn finished_games_carry_the_oracle_result() {
        let script = vec![
            Reply::Move("f2f3"),
            Reply::Move("e7e5"),
            Reply::Move("g2g4"),
            Reply::Move("d8h4"),
        ];
        let (worker, harness) = worker(config(1), vec![script], SMALL_RSS);
        let summary = worker.run();

        assert_eq!(summary.finished, 1);
        let transcripts = harness.sink.0.lock().unwrap();
        assert_eq!(transcripts[0].result, "0-1");
        assert_eq!(transcripts[0].moves.last().map(String::as_str), Some("Qh4#"));
    }
}
