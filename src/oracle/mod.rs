// SPDX-License-Identifier: PMPL-1.0-or-later

//! Rules oracle: validates and advances the domain state the workload drives.

mod chess;

pub use self::chess::{ChessOracle, ChessState};

use crate::error::OracleError;
use std::collections::BTreeSet;

/// Legality rules for the protocol payload.
///
/// Actions are the textual tokens the subject emits (UCI move strings for
/// chess). States are values; `apply` returns a new state and leaves the
/// old one untouched.
pub trait RulesOracle: Send {
    type State: Clone + Send;

    fn new_state(&self) -> Self::State;

    fn legal_actions(&self, state: &Self::State) -> BTreeSet<String>;

    fn apply(&self, state: &Self::State, action: &str) -> Result<Self::State, OracleError>;

    fn is_terminal(&self, state: &Self::State) -> bool;

    /// Text form of `state` used in protocol requests and crash contexts.
    fn serialize(&self, state: &Self::State) -> String;

    /// Result token for transcripts (`1-0`, `0-1`, `1/2-1/2` or `*`).
    fn result(&self, _state: &Self::State) -> String {
        "*".to_string()
    }

    /// Human notation for `action` played from `state`; defaults to the token.
    fn notation(&self, _state: &Self::State, action: &str) -> String {
        action.to_string()
    }
}
