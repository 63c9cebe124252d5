// SPDX-License-Identifier: PMPL-1.0-or-later

//! uci-stress: crash-discovery stress harness for UCI chess engines
//!
//! Runs concurrent self-play workers against an engine and writes a crash
//! report whenever the engine prints a sanitizer trace, outgrows its memory
//! limit, stops answering, plays an illegal move or dies.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uci_stress::capture::DebuggerPolicy;
use uci_stress::layout::OutputLayout;
use uci_stress::legality::{self, GameOutcome, LegalityConfig};
use uci_stress::profile::StressProfile;
use uci_stress::session::DEFAULT_HANDSHAKE_TIMEOUT;
use uci_stress::types::{StressConfig, StressReport};
use uci_stress::{environment, logging, supervisor};

#[derive(Parser)]
#[command(name = "uci-stress")]
#[command(version)]
#[command(about = "Crash-discovery stress harness for UCI chess engines")]
#[command(long_about = None)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    stress: StressArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Self-play the engine and check every move for legality
    Legality(LegalityArgs),
}

#[derive(Args)]
struct StressArgs {
    /// Engine executable to stress
    #[arg(long, value_name = "PATH", required = true)]
    engine: Option<PathBuf>,

    /// Concurrent workers, one engine process each [default: 2]
    #[arg(long)]
    workers: Option<usize>,

    /// Games per worker, 0 for unlimited [default: 0]
    #[arg(long)]
    games: Option<u64>,

    /// Search depth per move [default: 12]
    #[arg(long)]
    depth: Option<u32>,

    /// Moves per game before it is abandoned [default: 100]
    #[arg(long)]
    max_moves: Option<u32>,

    /// Resident memory limit in MB [default: 2048]
    #[arg(long)]
    mem_limit_mb: Option<f64>,

    /// Seconds without a bestmove before reporting a possible spin [default: 10]
    #[arg(long)]
    spin_sec: Option<f64>,

    /// JSON or YAML stress profile (engine args, env, UCI options, limits)
    #[arg(long, value_name = "FILE")]
    profile: Option<PathBuf>,

    /// Directory for logs and crash reports
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Directory for game transcripts
    #[arg(long, default_value = "pgn")]
    pgn_dir: PathBuf,

    /// Write the run summary as JSON
    #[arg(long, value_name = "FILE")]
    summary: Option<PathBuf>,

    /// Never run a debugger on core dumps
    #[arg(long)]
    no_debugger: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

impl StressArgs {
    /// CLI values override whatever the defaults and profile set.
    fn apply(&self, config: &mut StressConfig) -> Result<()> {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(games) = self.games {
            config.games = games;
        }
        if let Some(depth) = self.depth {
            config.depth = depth;
        }
        if let Some(max_moves) = self.max_moves {
            config.max_moves = max_moves;
        }
        if let Some(mem) = self.mem_limit_mb {
            config.mem_limit_mb = mem;
        }
        if let Some(spin) = self.spin_sec {
            config.spin = Duration::try_from_secs_f64(spin)
                .map_err(|_| anyhow!("--spin-sec must be a non-negative number, got {}", spin))?;
        }
        config.layout = OutputLayout::new(&self.log_dir, &self.pgn_dir);
        if self.no_debugger {
            config.debugger = DebuggerPolicy::Disabled;
        }
        Ok(())
    }
}

#[derive(Args)]
struct LegalityArgs {
    /// Engine executable to test
    #[arg(long, value_name = "PATH")]
    engine: PathBuf,

    /// Number of games
    #[arg(long, default_value = "10")]
    games: u32,

    /// Search depth per move
    #[arg(long, default_value = "6")]
    depth: u32,

    /// Engine moves per game
    #[arg(long, default_value = "200")]
    max_moves: u32,

    /// Random legal moves played before the engine takes over
    #[arg(long, default_value = "8")]
    random_opening: u32,

    /// Directory for engine output logs
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Legality(args)) => run_legality(args),
        None => run_stress(cli.stress),
    }
}

fn run_stress(args: StressArgs) -> Result<ExitCode> {
    let _guard = logging::init(&args.log_dir, args.verbose)?;

    let engine = args
        .engine
        .clone()
        .ok_or_else(|| anyhow!("--engine is required"))?;
    if !engine.is_file() {
        error!(engine = %engine.display(), "engine not found: {}", engine.display());
        return Ok(ExitCode::from(1));
    }

    let mut config = StressConfig::new(engine);
    if let Some(profile) = &args.profile {
        StressProfile::load(profile)?.apply(&mut config)?;
    }
    args.apply(&mut config)?;

    match environment::enable_core_dumps() {
        Ok(()) => debug!("core dump limit raised"),
        Err(reason) => warn!("core dumps not enabled: {}", reason),
    }

    let cancel = Arc::new(AtomicBool::new(false));
    supervisor::watch_interrupt(cancel.clone())?;
    let report = supervisor::run(&config, cancel)?;

    print_summary(&report);
    if let Some(path) = &args.summary {
        save_summary(&report, path)?;
        println!("Summary saved to: {}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(report: &StressReport) {
    println!("\nStress Summary:");
    println!("  Engine: {}", report.engine.display());
    println!("  Iterations: {}", report.total_iterations());
    println!("  Triggers: {}", report.total_triggers());
    if report.interrupted {
        println!("  Interrupted: yes");
    }
    for worker in &report.workers {
        println!(
            "  [w{}] games {} finished {} inconclusive {} step-limit {} triggers {} errors {}",
            worker.worker,
            worker.iterations,
            worker.finished,
            worker.inconclusive,
            worker.step_limits,
            worker.triggers,
            worker.failed_iterations
        );
        if let Some(reason) = &worker.aborted {
            println!("       aborted: {}", reason);
        }
        for report in &worker.crash_reports {
            println!("       crash: {}", report.display());
        }
    }
}

fn save_summary(report: &StressReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("writing summary {}", path.display()))
}

fn run_legality(args: LegalityArgs) -> Result<ExitCode> {
    let _guard = logging::init(&args.log_dir, args.verbose)?;

    if !args.engine.is_file() {
        error!(engine = %args.engine.display(), "engine not found: {}", args.engine.display());
        return Ok(ExitCode::from(1));
    }

    let config = LegalityConfig {
        engine: args.engine.clone(),
        games: args.games,
        depth: args.depth,
        max_moves: args.max_moves,
        random_opening: args.random_opening,
        response_timeout: Duration::from_secs(30),
        handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        layout: OutputLayout::new(&args.log_dir, "pgn"),
    };

    println!("Self-Play Legal Move Tester");
    println!("  Engine: {}", config.engine.display());
    println!("  Games: {}", config.games);
    println!("  Depth: {}", config.depth);
    println!();

    let report = legality::run(&config, |game, outcome| print_game(game, config.games, outcome));

    let total = report.total_moves();
    println!("\nSummary:");
    println!("  Total moves: {}", total);
    println!(
        "  Legal moves: {} ({:.1}%)",
        report.legal_moves(),
        report.legal_moves() as f64 * 100.0 / total.max(1) as f64
    );
    println!("  Illegal moves: {}", report.illegal_moves());
    println!("  Null moves: {}", report.null_moves());
    if report.errors() > 0 {
        println!("  Games not played: {}", report.errors());
    }

    if report.passed() {
        println!("\nAll moves legal. Engine passed.");
        Ok(ExitCode::SUCCESS)
    } else {
        println!(
            "\nFAILED: {} illegal and {} null moves.",
            report.illegal_moves(),
            report.null_moves()
        );
        Ok(ExitCode::from(1))
    }
}

fn print_game(game: u32, games: u32, outcome: &GameOutcome) {
    match outcome {
        Ok(record) => {
            let mark = if record.passed() { "ok" } else { "FAIL" };
            println!(
                "Game {}/{}: {} {} moves, result: {}",
                game,
                games,
                mark,
                record.moves.len(),
                record.result
            );
            if !record.passed() {
                println!("   Issues: {} illegal, {} null", record.illegal(), record.null());
                for issue in record.issues() {
                    println!("      {}", issue);
                }
            }
        }
        Err(err) => println!("Game {}/{}: error: {}", game, games, err),
    }
}
