// SPDX-License-Identifier: PMPL-1.0-or-later

//! Debugger resolution and non-interactive backtrace extraction.

use super::cores::Platform;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// Command template for one debugger.
pub struct DebuggerTemplate {
    pub program: &'static str,
    /// Upper-case label used in the report section header.
    pub label: &'static str,
    args: fn(&Path, &Path) -> Vec<OsString>,
}

impl std::fmt::Debug for DebuggerTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebuggerTemplate")
            .field("program", &self.program)
            .field("label", &self.label)
            .finish()
    }
}

impl DebuggerTemplate {
    pub fn args(&self, executable: &Path, core: &Path) -> Vec<OsString> {
        (self.args)(executable, core)
    }
}

fn lldb_args(executable: &Path, core: &Path) -> Vec<OsString> {
    vec![
        "-b".into(),
        "-o".into(),
        "bt all".into(),
        "-o".into(),
        "quit".into(),
        "--".into(),
        executable.into(),
        "-c".into(),
        core.into(),
    ]
}

fn gdb_args(executable: &Path, core: &Path) -> Vec<OsString> {
    vec![
        "-batch".into(),
        "-ex".into(),
        "thread apply all bt".into(),
        executable.into(),
        core.into(),
    ]
}

fn cdb_args(_executable: &Path, core: &Path) -> Vec<OsString> {
    vec![
        "-z".into(),
        core.into(),
        "-c".into(),
        "!analyze -v; ~* kb; q".into(),
    ]
}

pub const LLDB: DebuggerTemplate = DebuggerTemplate {
    program: "lldb",
    label: "LLDB",
    args: lldb_args,
};

pub const GDB: DebuggerTemplate = DebuggerTemplate {
    program: "gdb",
    label: "GDB",
    args: gdb_args,
};

pub const CDB: DebuggerTemplate = DebuggerTemplate {
    program: "cdb",
    label: "CDB",
    args: cdb_args,
};

static LINUX_DEBUGGERS: [DebuggerTemplate; 2] = [LLDB, GDB];
static MACOS_DEBUGGERS: [DebuggerTemplate; 1] = [LLDB];
static WINDOWS_DEBUGGERS: [DebuggerTemplate; 1] = [CDB];

/// Debuggers to try, in preference order.
pub fn templates(platform: Platform) -> &'static [DebuggerTemplate] {
    match platform {
        Platform::Linux => &LINUX_DEBUGGERS,
        Platform::MacOs => &MACOS_DEBUGGERS,
        Platform::Windows => &WINDOWS_DEBUGGERS,
        Platform::Other => &[],
    }
}

/// Whether crash capture may run a debugger at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebuggerPolicy {
    #[default]
    Auto,
    Disabled,
}

/// A debugger found on `PATH`.
#[derive(Debug)]
pub struct Debugger {
    pub path: PathBuf,
    pub template: &'static DebuggerTemplate,
}

impl Debugger {
    pub fn label(&self) -> &'static str {
        self.template.label
    }

    /// Runs the debugger against `core` with merged output, killing it after `timeout`.
    ///
    /// Failures come back as a message suitable for an inline report note.
    pub fn backtrace(
        &self,
        executable: &Path,
        core: &Path,
        timeout: Duration,
    ) -> Result<String, String> {
        let args = self.template.args(executable, core);
        info!(debugger = %self.path.display(), core = %core.display(), "running debugger");

        let (mut output, writer) = std::io::pipe().map_err(|err| err.to_string())?;
        let error_writer = writer.try_clone().map_err(|err| err.to_string())?;
        let spawned = {
            let mut command = Command::new(&self.path);
            command
                .args(&args)
                .stdin(Stdio::null())
                .stdout(writer)
                .stderr(error_writer);
            command.spawn()
        };
        let mut child = spawned.map_err(|err| format!("failed to start {}: {}", self.path.display(), err))?;

        let collector = thread::spawn(move || {
            let mut bytes = Vec::new();
            let _ = output.read_to_end(&mut bytes);
            bytes
        });

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if start.elapsed() >= timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    break None;
                }
                Ok(None) => thread::sleep(Duration::from_millis(50)),
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(format!("failed to wait for debugger: {}", err));
                }
            }
        };

        let bytes = collector
            .join()
            .map_err(|_| "debugger output collector panicked".to_string())?;
        let text = String::from_utf8_lossy(&bytes).to_string();
        match status {
            Some(_) => Ok(text),
            None => Err(format!(
                "debugger timed out after {}s; partial output:\n{}",
                timeout.as_secs(),
                text
            )),
        }
    }
}

/// First available debugger for `platform` under `policy`.
pub fn resolve(platform: Platform, policy: DebuggerPolicy) -> Option<Debugger> {
    if policy == DebuggerPolicy::Disabled {
        return None;
    }
    templates(platform).iter().find_map(|template| {
        which::which(template.program)
            .ok()
            .map(|path| Debugger { path, template })
    })
}
