// SPDX-License-Identifier: PMPL-1.0-or-later

//! uci-stress — crash-discovery stress harness for UCI chess engines.
//!
//! Workers drive long-lived engine processes through self-play games while
//! watching for trouble:
//!
//! 1. **Signatures**: sanitizer and abort markers in the engine's output.
//! 2. **Sampler**: resident memory against a configured limit.
//! 3. **Spin detection**: no `bestmove` within the spin threshold.
//! 4. **Oracle**: every move checked against the rules before it is played.
//!
//! Any trigger produces a crash report with the worker context, the raw
//! diagnostic output and, when a core dump and a debugger can be found, a
//! backtrace of every thread.

pub mod capture;
pub mod environment;
pub mod error;
pub mod layout;
pub mod legality;
pub mod logging;
pub mod oracle;
pub mod profile;
pub mod sampler;
pub mod session;
pub mod signatures;
pub mod supervisor;
pub mod transcript;
pub mod types;
pub mod worker;
