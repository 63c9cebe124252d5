// SPDX-License-Identifier: PMPL-1.0-or-later

//! Crash capture: turn a detected anomaly into a durable forensic report.
//!
//! Every phase after the report header is independently fault tolerant.
//! Core discovery or debugger trouble is written into the report inline and
//! never surfaces to the caller, which always gets the report path back.

pub mod cores;
pub mod debugger;

pub use cores::{CoreLocator, Platform};
pub use debugger::{Debugger, DebuggerPolicy};

use crate::layout::OutputLayout;
use crate::types::CrashContext;
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

pub const CRASH_HEADER: &str = "=== CRASH DETECTED ===";
pub const DIAGNOSTIC_HEADER: &str = "=== STDERR / ASAN ===";
pub const DEBUGGER_NOT_FOUND: &str = "=== DEBUGGER NOT FOUND ===";
pub const NO_CORE_FOUND: &str = "=== NO CORE DUMP FOUND ===";
pub const BACKTRACE_SUFFIX: &str = "BACKTRACE ===";
pub const DEBUGGER_ERROR: &str = "[DEBUGGER ERROR]";

pub const DEFAULT_DEBUGGER_TIMEOUT: Duration = Duration::from_secs(120);

/// Crash report writer shared (by clone) across workers.
#[derive(Debug, Clone)]
pub struct CrashCapture {
    layout: OutputLayout,
    locator: CoreLocator,
    policy: DebuggerPolicy,
    debugger_timeout: Duration,
}

impl CrashCapture {
    pub fn new(layout: OutputLayout, locator: CoreLocator, policy: DebuggerPolicy) -> Self {
        Self {
            layout,
            locator,
            policy,
            debugger_timeout: DEFAULT_DEBUGGER_TIMEOUT,
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Writes a crash report and returns its path unconditionally.
    ///
    /// Reports are keyed by the current second and opened for append, so two
    /// captures in the same second share one file without losing content.
    pub fn capture_crash(
        &self,
        context: CrashContext,
        diagnostic: &str,
        pid_hint: Option<u32>,
        note: &str,
    ) -> PathBuf {
        let path = self.layout.crash_report(Utc::now().timestamp());

        if let Err(err) = append(&path, &render_header(&context, diagnostic, note)) {
            error!(report = %path.display(), %err, "failed to write crash report");
            return path;
        }

        // Cores are only searched for once a debugger is available.
        let tail = match debugger::resolve(self.locator.platform(), self.policy) {
            None => format!("\n{}\n", DEBUGGER_NOT_FOUND),
            Some(debugger) => match self.locator.discover(pid_hint).first() {
                None => format!("\n{}\n", NO_CORE_FOUND),
                Some(core) => self.backtrace_section(&debugger, &context.subject, core),
            },
        };
        if let Err(err) = append(&path, &tail) {
            warn!(report = %path.display(), %err, "failed to append debugger section");
        }

        info!(report = %path.display(), note, worker = context.worker, "crash -> {}", path.display());
        path
    }

    fn backtrace_section(&self, debugger: &Debugger, executable: &Path, core: &Path) -> String {
        let mut section = format!("\nCore: {}\n", core.display());
        match debugger.backtrace(executable, core, self.debugger_timeout) {
            Ok(output) => {
                section.push_str(&format!("\n=== {} {}\n", debugger.label(), BACKTRACE_SUFFIX));
                section.push_str(&output);
                if !output.ends_with('\n') {
                    section.push('\n');
                }
            }
            Err(err) => section.push_str(&format!("\n{} {}\n", DEBUGGER_ERROR, err)),
        }
        section
    }
}

fn render_header(context: &CrashContext, diagnostic: &str, note: &str) -> String {
    let mut out = String::new();
    out.push_str(CRASH_HEADER);
    out.push('\n');
    for (key, value) in context.fields() {
        out.push_str(&format!("{}: {}\n", key, value));
    }
    if !note.is_empty() {
        out.push_str(&format!("Note: {}\n", note));
    }
    if let Some(detail) = &context.note {
        out.push_str(&format!("Detail: {}\n", detail));
    }
    out.push('\n');
    out.push_str(DIAGNOSTIC_HEADER);
    out.push('\n');
    out.push_str(diagnostic);
    out.push('\n');
    out
}

fn append(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())
}
