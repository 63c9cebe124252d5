// SPDX-License-Identifier: PMPL-1.0-or-later

//! Self-play legality tester.
//!
//! Each game starts a fresh subject, plays a few random legal opening moves,
//! then lets the engine play both sides from `position startpos moves ...`,
//! checking every reply against the rules.

use crate::layout::OutputLayout;
use crate::oracle::{ChessOracle, ChessState, RulesOracle};
use crate::session::{BestMove, Position, Session, SubjectCommand};
use rand::seq::IteratorRandom;
use rand::Rng;
use serde::Serialize;
use shakmaty::Position as _;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Legal moves listed next to an illegal one.
const LEGAL_SAMPLE: usize = 5;

#[derive(Debug, Clone)]
pub struct LegalityConfig {
    pub engine: PathBuf,
    pub games: u32,
    pub depth: u32,
    pub max_moves: u32,
    pub random_opening: u32,
    pub response_timeout: Duration,
    pub handshake_timeout: Duration,
    pub layout: OutputLayout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MoveStatus {
    Ok,
    RandomOpening,
    /// Null move where the game is drawn or over anyway.
    DrawPosition,
    /// Null move in a live position.
    NullMove,
    Illegal { legal: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveRecord {
    pub ply: usize,
    pub action: String,
    pub status: MoveStatus,
}

impl MoveRecord {
    pub fn is_legal(&self) -> bool {
        !matches!(self.status, MoveStatus::NullMove | MoveStatus::Illegal { .. })
    }
}

impl std::fmt::Display for MoveRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.status {
            MoveStatus::Ok => write!(f, "Move {}: {} - OK", self.ply, self.action),
            MoveStatus::RandomOpening => write!(f, "Move {}: {} - RANDOM_OPENING", self.ply, self.action),
            MoveStatus::DrawPosition => write!(f, "Move {}: {} - DRAW_POSITION", self.ply, self.action),
            MoveStatus::NullMove => write!(f, "Move {}: {} - NULL_MOVE", self.ply, self.action),
            MoveStatus::Illegal { legal } => write!(
                f,
                "Move {}: {} - ILLEGAL (legal: {}...)",
                self.ply,
                self.action,
                legal.join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GameRecord {
    pub moves: Vec<MoveRecord>,
    pub result: String,
}

impl GameRecord {
    pub fn illegal(&self) -> usize {
        self.moves
            .iter()
            .filter(|m| matches!(m.status, MoveStatus::Illegal { .. }))
            .count()
    }

    pub fn null(&self) -> usize {
        self.moves
            .iter()
            .filter(|m| m.status == MoveStatus::NullMove)
            .count()
    }

    pub fn passed(&self) -> bool {
        self.illegal() == 0 && self.null() == 0
    }

    pub fn issues(&self) -> impl Iterator<Item = &MoveRecord> {
        self.moves.iter().filter(|m| !m.is_legal())
    }
}

/// Outcome of one game: a record, or why the game could not be played.
pub type GameOutcome = Result<GameRecord, String>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct LegalityReport {
    pub games: Vec<GameOutcome>,
}

impl LegalityReport {
    fn records(&self) -> impl Iterator<Item = &GameRecord> {
        self.games.iter().filter_map(|game| game.as_ref().ok())
    }

    pub fn total_moves(&self) -> usize {
        self.records().map(|g| g.moves.len()).sum()
    }

    pub fn legal_moves(&self) -> usize {
        self.records()
            .map(|g| g.moves.iter().filter(|m| m.is_legal()).count())
            .sum()
    }

    pub fn illegal_moves(&self) -> usize {
        self.records().map(GameRecord::illegal).sum()
    }

    pub fn null_moves(&self) -> usize {
        self.records().map(GameRecord::null).sum()
    }

    pub fn errors(&self) -> usize {
        self.games.iter().filter(|game| game.is_err()).count()
    }

    pub fn passed(&self) -> bool {
        self.illegal_moves() == 0 && self.null_moves() == 0 && self.errors() == 0
    }
}

/// Something that answers `bestmove` for a game given as moves from the start.
pub trait MoveSource {
    fn best_move(&mut self, moves: &[String], depth: u32, timeout: Duration) -> Option<BestMove>;
}

impl MoveSource for Session {
    fn best_move(&mut self, moves: &[String], depth: u32, timeout: Duration) -> Option<BestMove> {
        Session::best_move(self, Position::StartPos { moves }, depth, timeout)
    }
}

/// Plays one self-play game against `source`.
pub fn play_game<S, R>(source: &mut S, config: &LegalityConfig, rng: &mut R) -> GameRecord
where
    S: MoveSource,
    R: Rng,
{
    let oracle = ChessOracle::new();
    let mut board = oracle.new_state();
    let mut played: Vec<String> = Vec::new();
    let mut record = GameRecord::default();

    for _ in 0..config.random_opening {
        if oracle.is_terminal(&board) {
            break;
        }
        let Some(action) = oracle.legal_actions(&board).into_iter().choose(rng) else {
            break;
        };
        let Ok(next) = oracle.apply(&board, &action) else {
            break;
        };
        board = next;
        played.push(action.clone());
        record.moves.push(MoveRecord {
            ply: played.len(),
            action,
            status: MoveStatus::RandomOpening,
        });
    }

    for _ in 0..config.max_moves {
        if oracle.is_terminal(&board) {
            break;
        }
        let ply = played.len() + 1;
        let action = match source.best_move(&played, config.depth, config.response_timeout) {
            Some(BestMove::Move(action)) => action,
            Some(BestMove::Null) | None => {
                let status = if drawn(&board) {
                    MoveStatus::DrawPosition
                } else {
                    MoveStatus::NullMove
                };
                record.moves.push(MoveRecord {
                    ply,
                    action: "0000".to_string(),
                    status,
                });
                break;
            }
        };

        let legal = oracle.legal_actions(&board);
        match oracle.apply(&board, &action) {
            Ok(next) if legal.contains(&action) => {
                board = next;
                played.push(action.clone());
                record.moves.push(MoveRecord {
                    ply,
                    action,
                    status: MoveStatus::Ok,
                });
            }
            _ => {
                record.moves.push(MoveRecord {
                    ply,
                    action,
                    status: MoveStatus::Illegal {
                        legal: legal.into_iter().take(LEGAL_SAMPLE).collect(),
                    },
                });
                break;
            }
        }
    }

    record.result = if oracle.is_terminal(&board) {
        oracle.result(&board)
    } else {
        "*".to_string()
    };
    record
}

/// Runs `config.games` games, each against a freshly started subject.
///
/// `on_game` sees every game as soon as it finishes.
pub fn run<F>(config: &LegalityConfig, mut on_game: F) -> LegalityReport
where
    F: FnMut(u32, &GameOutcome),
{
    let mut rng = rand::thread_rng();
    let command = SubjectCommand::new(&config.engine);
    let mut report = LegalityReport::default();

    for game in 1..=config.games {
        let tag = format!("legality_g{}", game);
        let outcome = match Session::start(&command, &tag, &config.layout, config.handshake_timeout) {
            Ok(mut session) => {
                let record = play_game(&mut session, config, &mut rng);
                session.terminate();
                info!(game, moves = record.moves.len(), result = %record.result, "legality game finished");
                Ok(record)
            }
            Err(err) => {
                warn!(game, %err, "legality game could not start");
                Err(err.to_string())
            }
        };
        on_game(game, &outcome);
        report.games.push(outcome);
    }
    report
}

/// Draw conditions that make a null move acceptable.
fn drawn(board: &ChessState) -> bool {
    let position = board.position();
    position.is_game_over()
        || position.is_stalemate()
        || position.is_insufficient_material()
        || position.halfmoves() >= 100
        || board.repetitions() >= 3
}
