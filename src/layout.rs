// SPDX-License-Identifier: PMPL-1.0-or-later

//! Output directory layout shared by every worker.
//!
//! All files are distinct per session tag, per report timestamp or per
//! worker/iteration, so workers never contend on a file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const STRESS_LOG: &str = "stress.log";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLayout {
    pub log_dir: PathBuf,
    pub pgn_dir: PathBuf,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            pgn_dir: PathBuf::from("pgn"),
        }
    }
}

impl OutputLayout {
    pub fn new(log_dir: impl Into<PathBuf>, pgn_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            pgn_dir: pgn_dir.into(),
        }
    }

    /// Layout rooted under a single base directory (`<base>/logs`, `<base>/pgn`).
    pub fn under(base: &Path) -> Self {
        Self::new(base.join("logs"), base.join("pgn"))
    }

    /// Creates both directories if missing.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("creating log directory {}", self.log_dir.display()))?;
        fs::create_dir_all(&self.pgn_dir)
            .with_context(|| format!("creating transcript directory {}", self.pgn_dir.display()))?;
        Ok(())
    }

    /// Raw per-session output.
    pub fn engine_log(&self, tag: &str) -> PathBuf {
        self.log_dir.join(format!("engine_{}.log", tag))
    }

    /// Anomaly-only per-session output.
    pub fn anomaly_log(&self, tag: &str) -> PathBuf {
        self.log_dir.join(format!("stderr_{}.log", tag))
    }

    pub fn crash_report(&self, unix_seconds: i64) -> PathBuf {
        self.log_dir.join(format!("crash_{}.log", unix_seconds))
    }

    pub fn transcript(&self, worker: usize, iteration: u64, stamp: &str) -> PathBuf {
        self.pgn_dir
            .join(format!("w{}_g{}_{}.pgn", worker, iteration, stamp))
    }
}
