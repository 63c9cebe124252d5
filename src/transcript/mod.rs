// SPDX-License-Identifier: PMPL-1.0-or-later

//! Per-iteration transcripts, persisted as PGN.

use crate::layout::OutputLayout;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::PathBuf;

/// PGN lines are wrapped below this width.
const LINE_WIDTH: usize = 79;

/// Everything recorded about one iteration.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub worker: usize,
    pub iteration: u64,
    /// Display name of the subject, used for both players.
    pub subject: String,
    pub started: DateTime<Local>,
    /// Actions in human notation, in play order.
    pub moves: Vec<String>,
    pub result: String,
    pub termination: String,
}

impl Transcript {
    pub fn new(worker: usize, iteration: u64, subject: impl Into<String>) -> Self {
        Self {
            worker,
            iteration,
            subject: subject.into(),
            started: Local::now(),
            moves: Vec::new(),
            result: "*".to_string(),
            termination: String::new(),
        }
    }
}

/// Destination for finished transcripts.
pub trait TranscriptSink: Send {
    fn persist(&self, transcript: &Transcript) -> Result<PathBuf>;
}

/// Writes one `.pgn` file per iteration under the layout's transcript directory.
#[derive(Debug, Clone)]
pub struct PgnWriter {
    layout: OutputLayout,
}

impl PgnWriter {
    pub fn new(layout: OutputLayout) -> Self {
        Self { layout }
    }
}

impl TranscriptSink for PgnWriter {
    fn persist(&self, transcript: &Transcript) -> Result<PathBuf> {
        let stamp = transcript.started.format("%Y%m%d_%H%M%S").to_string();
        let path = self
            .layout
            .transcript(transcript.worker, transcript.iteration, &stamp);
        fs::write(&path, render_pgn(transcript))
            .with_context(|| format!("writing transcript {}", path.display()))?;
        Ok(path)
    }
}

pub fn render_pgn(transcript: &Transcript) -> String {
    let tags = [
        ("Event", "uci-stress".to_string()),
        ("Site", format!("worker {}", transcript.worker)),
        ("Date", transcript.started.format("%Y.%m.%d").to_string()),
        ("Round", transcript.iteration.to_string()),
        ("White", transcript.subject.clone()),
        ("Black", transcript.subject.clone()),
        ("Result", transcript.result.clone()),
        ("Termination", transcript.termination.clone()),
    ];

    let mut out = String::new();
    for (name, value) in tags {
        out.push_str(&format!("[{} \"{}\"]\n", name, escape_tag(&value)));
    }
    out.push('\n');

    let mut tokens = Vec::with_capacity(transcript.moves.len() * 3 / 2 + 1);
    for (ply, san) in transcript.moves.iter().enumerate() {
        if ply % 2 == 0 {
            tokens.push(format!("{}.", ply / 2 + 1));
        }
        tokens.push(san.clone());
    }
    tokens.push(transcript.result.clone());

    let mut line = String::new();
    for token in tokens {
        if !line.is_empty() && line.len() + 1 + token.len() > LINE_WIDTH {
            out.push_str(&line);
            out.push('\n');
            line.clear();
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(&token);
    }
    out.push_str(&line);
    out.push('\n');
    out
}

fn escape_tag(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Transcript {
        let mut transcript = Transcript::new(1, 3, "stockfish");
        transcript.moves = ["e4", "e5", "Nf3"].iter().map(|m| m.to_string()).collect();
        transcript.termination = "possible spin".to_string();
        transcript
    }

    #[test]
    fn pgn_has_tag_roster_and_numbered_movetext() {
        let pgn = render_pgn(&sample());
        assert!(pgn.starts_with("[Event \"uci-stress\"]\n"));
        assert!(pgn.contains("[Round \"3\"]"));
        assert!(pgn.contains("[White \"stockfish\"]"));
        assert!(pgn.contains("[Result \"*\"]"));
        assert!(pgn.contains("[Termination \"possible spin\"]"));
        assert!(pgn.ends_with("\n\n1. e4 e5 2. Nf3 *\n"));
    }

    #[test]
    fn empty_games_still_carry_a_result() {
        let pgn = render_pgn(&Transcript::new(0, 1, "engine"));
        assert!(pgn.ends_with("\n\n*\n"));
    }

    #[test]
    fn long_games_wrap_and_quotes_are_escaped() {
        let mut transcript = sample();
        transcript.subject = "my \"engine\"".to_string();
        transcript.moves = vec!["Nf3".to_string(); 120];
        let pgn = render_pgn(&transcript);
        assert!(pgn.contains("[White \"my \\\"engine\\\"\"]"));
        assert!(pgn.lines().all(|line| line.len() <= LINE_WIDTH));
    }

    #[test]
    fn writer_names_files_by_worker_and_iteration() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::under(dir.path());
        layout.ensure().unwrap();
        let path = PgnWriter::new(layout).persist(&sample()).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("w1_g3_"));
        assert!(name.ends_with(".pgn"));
        assert!(fs::read_to_string(path).unwrap().contains("Nf3"));
    }
}
