// SPDX-License-Identifier: PMPL-1.0-or-later

//! Shell-script fake engines for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uci_stress::layout::OutputLayout;
use uci_stress::session::SubjectCommand;

/// A fake UCI engine living in its own temp directory.
pub struct FakeEngine {
    pub dir: TempDir,
    pub script: PathBuf,
}

impl FakeEngine {
    /// Engine that answers the handshake and runs `on_go` for every `go`.
    pub fn answering(on_go: &str) -> Self {
        Self::with_handlers("", on_go)
    }

    /// `on_uci` runs after `uciok` is printed.
    pub fn with_handlers(on_uci: &str, on_go: &str) -> Self {
        let body = format!(
            r#"while IFS= read -r line; do
  case "$line" in
    uci) echo "id name fake"; echo "uciok"; {on_uci} ;;
    isready) echo "readyok" ;;
    go*) {on_go} ;;
    quit) exit 0 ;;
  esac
done
"#,
            on_uci = if on_uci.is_empty() { ":" } else { on_uci },
            on_go = if on_go.is_empty() { ":" } else { on_go },
        );
        Self::from_body(&body)
    }

    /// Engine that reads input and never prints anything.
    pub fn silent() -> Self {
        Self::from_body("cat > /dev/null\n")
    }

    fn from_body(body: &str) -> Self {
        let dir = TempDir::new().expect("tempdir should create");
        let script = dir.path().join("engine.sh");
        fs::write(&script, format!("#!/bin/sh\n{}", body)).expect("script should write");
        Self { dir, script }
    }

    /// Runs the script through `/bin/sh` so it never needs the exec bit.
    pub fn command(&self) -> SubjectCommand {
        let mut command = SubjectCommand::new("/bin/sh");
        command.args = vec![self.script.display().to_string()];
        command
    }

    pub fn layout(&self) -> OutputLayout {
        let layout = OutputLayout::under(self.dir.path());
        layout.ensure().expect("layout should create");
        layout
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

pub fn files_in(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.file_name()
                        .map(|name| name.to_string_lossy().starts_with(prefix))
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default();
    found.sort();
    found
}
