// SPDX-License-Identifier: PMPL-1.0-or-later

//! The UCI subset spoken to subject engines.

pub const UCI: &str = "uci";
pub const UCI_OK: &str = "uciok";
pub const IS_READY: &str = "isready";
pub const READY_OK: &str = "readyok";
pub const NEW_GAME: &str = "ucinewgame";
pub const QUIT: &str = "quit";
pub const BEST_MOVE: &str = "bestmove";

/// Tokens an engine uses to say it has no move to offer.
pub const NULL_MOVE_TOKENS: &[&str] = &["0000", "(none)"];

/// Position to search, rendered as a `position` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position<'a> {
    Fen(&'a str),
    StartPos { moves: &'a [String] },
}

impl Position<'_> {
    pub fn command(&self) -> String {
        match self {
            Position::Fen(fen) => format!("position fen {}", fen),
            Position::StartPos { moves } if moves.is_empty() => "position startpos".to_string(),
            Position::StartPos { moves } => format!("position startpos moves {}", moves.join(" ")),
        }
    }
}

pub fn go_depth(depth: u32) -> String {
    format!("go depth {}", depth)
}

pub fn set_option(name: &str, value: &str) -> String {
    format!("setoption name {} value {}", name, value)
}

/// Parsed `bestmove` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestMove {
    Move(String),
    Null,
}

impl BestMove {
    /// Parses a `bestmove <move> [ponder <move>]` line; other lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some(BEST_MOVE) {
            return None;
        }
        Some(match tokens.next() {
            Some(token) if !NULL_MOVE_TOKENS.contains(&token) => BestMove::Move(token.to_string()),
            _ => BestMove::Null,
        })
    }

    pub fn is_reply(line: &str) -> bool {
        line.starts_with(BEST_MOVE)
    }
}

/// True when the whitespace-separated `line` carries `token`.
pub fn has_token(line: &str, token: &str) -> bool {
    line.split_whitespace().any(|word| word == token)
}
