// SPDX-License-Identifier: PMPL-1.0-or-later

//! Typed error kinds for the session, sampler and rules-oracle seams.
//!
//! Application code (CLI, supervisor bootstrap) wraps these in `anyhow`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while starting or talking to a subject process.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The subject process could not be launched at all.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A pipe or log file operation failed.
    #[error("session i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The subject's input stream is gone (process exited or was terminated).
    #[error("session {tag} is closed")]
    Closed { tag: String },
}

/// Errors raised by the resource sampler.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("process {pid} is not available for sampling")]
    Unavailable { pid: u32 },

    #[error("failed to read process statistics: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected process statistics format: {0}")]
    Parse(String),
}

/// Rejections from the rules oracle when applying an action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// The action token could not be parsed at all.
    #[error("unparseable action '{action}': {reason}")]
    Unparseable { action: String, reason: String },

    /// The action parsed but is not legal in the current state.
    #[error("illegal action '{action}' in state {state}")]
    Illegal { action: String, state: String },
}
