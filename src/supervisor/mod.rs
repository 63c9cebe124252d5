// SPDX-License-Identifier: PMPL-1.0-or-later

//! Starts the workers, polls them, and stops waiting on interrupt.
//!
//! Workers share nothing mutable; each owns its subject and writes files
//! keyed by its own tag. Worker threads are never joined on interrupt, so
//! they do not hold up process exit.

use crate::capture::{CoreLocator, CrashCapture};
use crate::environment;
use crate::oracle::ChessOracle;
use crate::session::SubjectCommand;
use crate::types::{StressConfig, StressReport, WorkerSummary};
use crate::worker::{SessionLauncher, StressWorker, WorkerConfig};
use anyhow::{Context, Result};
use chrono::Local;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Runs `config.workers` workers to completion or until `cancel` is set.
///
/// Workers read `cancel` between iterations; the supervisor itself returns
/// at the next poll after it is set, leaving running workers detached.
pub fn run(config: &StressConfig, cancel: Arc<AtomicBool>) -> Result<StressReport> {
    config.layout.ensure()?;
    let started_at = Local::now().to_rfc3339();

    let command = SubjectCommand {
        program: config.engine.clone(),
        args: config.engine_args.clone(),
        env: environment::subject_environment(&config.env, |key| std::env::var(key).ok()),
        options: config.uci_options.clone(),
    };
    let capture = CrashCapture::new(
        config.layout.clone(),
        CoreLocator::for_current_platform(),
        config.debugger,
    );
    let worker_config = WorkerConfig {
        subject: config.engine.clone(),
        games: config.games,
        depth: config.depth,
        max_moves: config.max_moves,
        mem_limit_mb: config.mem_limit_mb,
        spin: config.spin,
        response_cap: config.response_cap,
    };

    info!(
        engine = %config.engine.display(),
        workers = config.workers,
        games = config.games,
        depth = config.depth,
        "starting stress run"
    );

    let mut pending: Vec<(usize, JoinHandle<WorkerSummary>)> = Vec::with_capacity(config.workers);
    for id in 0..config.workers {
        let launcher = SessionLauncher::new(
            command.clone(),
            config.layout.clone(),
            config.handshake_timeout,
        );
        let worker = StressWorker::new(
            id,
            worker_config.clone(),
            ChessOracle::new(),
            launcher,
            capture.clone(),
            cancel.clone(),
        );
        let handle = thread::Builder::new()
            .name(format!("worker-{}", id))
            .spawn(move || worker.run())
            .with_context(|| format!("spawning worker {}", id))?;
        pending.push((id, handle));
    }

    let mut summaries = Vec::with_capacity(config.workers);
    let mut interrupted = false;
    loop {
        let (finished, running): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|(_, handle)| handle.is_finished());
        for (id, handle) in finished {
            summaries.push(collect(id, handle));
        }
        pending = running;

        if pending.is_empty() {
            break;
        }
        if cancel.load(Ordering::Relaxed) {
            interrupted = true;
            warn!(running = pending.len(), "interrupted, no longer waiting for workers");
            for (id, _) in pending {
                let mut summary = WorkerSummary::new(id);
                summary.aborted = Some("interrupted".to_string());
                summaries.push(summary);
            }
            break;
        }
        wait(POLL_INTERVAL, &cancel);
    }

    summaries.sort_by_key(|summary| summary.worker);
    let report = StressReport {
        engine: config.engine.clone(),
        started_at,
        finished_at: Local::now().to_rfc3339(),
        interrupted,
        workers: summaries,
    };
    info!(
        iterations = report.total_iterations(),
        triggers = report.total_triggers(),
        interrupted,
        "stress run finished"
    );
    Ok(report)
}

fn collect(id: usize, handle: JoinHandle<WorkerSummary>) -> WorkerSummary {
    match handle.join() {
        Ok(summary) => summary,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(worker = id, "worker panicked: {}", message);
            let mut summary = WorkerSummary::new(id);
            summary.aborted = Some(format!("panicked: {}", message));
            summary
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Sleeps up to `interval`, returning early once `cancel` is set.
fn wait(interval: Duration, cancel: &AtomicBool) {
    let deadline = Instant::now() + interval;
    while Instant::now() < deadline && !cancel.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(20));
    }
}

/// Sets `cancel` on Ctrl-C (and SIGTERM on Unix) from a background thread.
pub fn watch_interrupt(cancel: Arc<AtomicBool>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    thread::Builder::new()
        .name("signal".to_string())
        .spawn(move || {
            runtime.block_on(shutdown_signal());
            info!("interrupt received");
            cancel.store(true, Ordering::Relaxed);
        })
        .context("spawning signal thread")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}
