// SPDX-License-Identifier: PMPL-1.0-or-later

//! Standard chess rules backed by `shakmaty`.

use super::RulesOracle;
use crate::error::OracleError;
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Move, Position};
use std::collections::{BTreeSet, HashMap};

/// Halfmove clock at which the 75-move rule ends the game.
const SEVENTY_FIVE_MOVE_RULE: u32 = 150;

/// Occurrences of one position that end the game.
const FIVEFOLD_REPETITION: u32 = 5;

/// A chess position plus how often each position has occurred since the
/// last pawn move or capture.
#[derive(Debug, Clone)]
pub struct ChessState {
    position: Chess,
    seen: HashMap<String, u32>,
}

impl ChessState {
    fn new(position: Chess) -> Self {
        let mut state = Self {
            position,
            seen: HashMap::new(),
        };
        state.record();
        state
    }

    pub fn position(&self) -> &Chess {
        &self.position
    }

    /// How many times the current position has occurred, itself included.
    pub fn repetitions(&self) -> u32 {
        self.seen.get(&self.key()).copied().unwrap_or(0)
    }

    fn after(&self, position: Chess) -> Self {
        let seen = if position.halfmoves() == 0 {
            HashMap::new()
        } else {
            self.seen.clone()
        };
        let mut next = Self { position, seen };
        next.record();
        next
    }

    fn record(&mut self) {
        *self.seen.entry(self.key()).or_insert(0) += 1;
    }

    /// Placement, side to move, castling rights and en passant square.
    fn key(&self) -> String {
        let fen = Fen::from_position(&self.position, EnPassantMode::Legal).to_string();
        fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChessOracle;

impl ChessOracle {
    pub fn new() -> Self {
        Self
    }

    fn resolve(&self, state: &ChessState, action: &str) -> Result<Move, OracleError> {
        let uci: UciMove = action.parse().map_err(|err| OracleError::Unparseable {
            action: action.to_string(),
            reason: format!("{}", err),
        })?;
        uci.to_move(&state.position).map_err(|_| OracleError::Illegal {
            action: action.to_string(),
            state: self.serialize(state),
        })
    }
}

impl RulesOracle for ChessOracle {
    type State = ChessState;

    fn new_state(&self) -> ChessState {
        ChessState::new(Chess::default())
    }

    fn legal_actions(&self, state: &ChessState) -> BTreeSet<String> {
        state
            .position
            .legal_moves()
            .iter()
            .map(|m| m.to_uci(CastlingMode::Standard).to_string())
            .collect()
    }

    fn apply(&self, state: &ChessState, action: &str) -> Result<ChessState, OracleError> {
        let m = self.resolve(state, action)?;
        let position = state.position.clone().play(m).map_err(|_| OracleError::Illegal {
            action: action.to_string(),
            state: self.serialize(state),
        })?;
        Ok(state.after(position))
    }

    fn is_terminal(&self, state: &ChessState) -> bool {
        state.position.is_game_over() || automatic_draw(state)
    }

    fn serialize(&self, state: &ChessState) -> String {
        Fen::from_position(&state.position, EnPassantMode::Legal).to_string()
    }

    fn result(&self, state: &ChessState) -> String {
        let token = state.position.outcome().to_string();
        if token == "*" && automatic_draw(state) {
            "1/2-1/2".to_string()
        } else {
            token
        }
    }

    fn notation(&self, state: &ChessState, action: &str) -> String {
        match self.resolve(state, action) {
            Ok(m) => SanPlus::from_move(state.position.clone(), m).to_string(),
            Err(_) => action.to_string(),
        }
    }
}

/// Draws the arbiter declares without a claim: 75-move rule and fivefold repetition.
fn automatic_draw(state: &ChessState) -> bool {
    state.position.halfmoves() >= SEVENTY_FIVE_MOVE_RULE
        || state.repetitions() >= FIVEFOLD_REPETITION
}
