// SPDX-License-Identifier: PMPL-1.0-or-later

//! Platform table for core/minidump discovery.
//!
//! Dumps are only ever read; nothing here creates, moves or deletes them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Depth limit for the recursive working-directory fallback.
const RECURSIVE_DEPTH: usize = 8;

/// Extensions that mean a `core*` match is source or text, not a dump.
const TEXT_EXTENSIONS: &[&str] = &[
    "rs", "c", "cc", "cpp", "h", "hpp", "py", "txt", "md", "json", "toml", "yaml", "yml", "log",
    "pgn", "o", "d",
];

/// Directories never descended into by the recursive fallback.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => Platform::Linux,
            "macos" => Platform::MacOs,
            "windows" => Platform::Windows,
            _ => Platform::Other,
        }
    }
}

/// Where a search rule looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    /// The harness working directory.
    WorkingDir,
    /// A fixed system directory.
    System(&'static str),
    /// A subdirectory of a directory named by an environment variable.
    EnvSubdir {
        var: &'static str,
        subdir: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchRule {
    /// Non-recursive glob inside `root`.
    Glob { root: Root, pattern: &'static str },
    /// Recursive walk of the working directory for names starting with
    /// `prefix`; only runs when every earlier working-directory rule found
    /// nothing.
    RecursiveFallback { prefix: &'static str },
}

const LINUX_RULES: &[SearchRule] = &[
    SearchRule::Glob {
        root: Root::WorkingDir,
        pattern: "core*",
    },
    SearchRule::RecursiveFallback { prefix: "core" },
    SearchRule::Glob {
        root: Root::System("/var/lib/apport/coredump"),
        pattern: "CoreDump*",
    },
];

const MACOS_RULES: &[SearchRule] = &[SearchRule::Glob {
    root: Root::System("/cores"),
    pattern: "core.*",
}];

const WINDOWS_RULES: &[SearchRule] = &[
    SearchRule::Glob {
        root: Root::EnvSubdir {
            var: "LOCALAPPDATA",
            subdir: "CrashDumps",
        },
        pattern: "*.dmp",
    },
    SearchRule::Glob {
        root: Root::WorkingDir,
        pattern: "*.dmp",
    },
];

pub fn search_rules(platform: Platform) -> &'static [SearchRule] {
    match platform {
        Platform::Linux => LINUX_RULES,
        Platform::MacOs => MACOS_RULES,
        Platform::Windows => WINDOWS_RULES,
        Platform::Other => &[],
    }
}

/// Finds dump artifacts for one platform relative to one working directory.
#[derive(Debug, Clone)]
pub struct CoreLocator {
    platform: Platform,
    working_dir: PathBuf,
    include_system: bool,
}

impl CoreLocator {
    pub fn new(platform: Platform, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            working_dir: working_dir.into(),
            include_system: true,
        }
    }

    /// Locator for this platform rooted at the process working directory.
    pub fn for_current_platform() -> Self {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new(Platform::current(), working_dir)
    }

    /// Restricts the search to working-directory rules.
    pub fn working_dir_only(mut self) -> Self {
        self.include_system = false;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Candidate dumps, newest first by modification time.
    ///
    /// With a `pid_hint`, candidates whose file name contains the pid are
    /// returned alone; if none do, the unfiltered list is returned.
    pub fn discover(&self, pid_hint: Option<u32>) -> Vec<PathBuf> {
        let mut found: BTreeMap<PathBuf, SystemTime> = BTreeMap::new();
        let mut working_dir_hits = 0usize;

        for rule in search_rules(self.platform) {
            match *rule {
                SearchRule::Glob { root, pattern } => {
                    let Some(dir) = self.resolve_root(root) else {
                        continue;
                    };
                    let before = found.len();
                    self.glob_into(&dir, pattern, &mut found);
                    if root == Root::WorkingDir {
                        working_dir_hits += found.len() - before;
                    }
                }
                SearchRule::RecursiveFallback { prefix } => {
                    if working_dir_hits == 0 {
                        let before = found.len();
                        self.walk_into(prefix, &mut found);
                        working_dir_hits += found.len() - before;
                    }
                }
            }
        }

        let candidates = newest_first(found);
        match pid_hint {
            Some(pid) => filter_by_pid(candidates, pid),
            None => candidates,
        }
    }

    fn resolve_root(&self, root: Root) -> Option<PathBuf> {
        let dir = match root {
            Root::WorkingDir => self.working_dir.clone(),
            Root::System(path) if self.include_system => PathBuf::from(path),
            Root::EnvSubdir { var, subdir } if self.include_system => {
                let base = std::env::var_os(var).filter(|value| !value.is_empty())?;
                PathBuf::from(base).join(subdir)
            }
            _ => return None,
        };
        dir.is_dir().then_some(dir)
    }

    fn glob_into(&self, dir: &Path, pattern: &str, found: &mut BTreeMap<PathBuf, SystemTime>) {
        let escaped = glob::Pattern::escape(&dir.to_string_lossy());
        let full = format!("{}{}{}", escaped, std::path::MAIN_SEPARATOR, pattern);
        let paths = match glob::glob(&full) {
            Ok(paths) => paths,
            Err(err) => {
                warn!(pattern = %full, %err, "invalid core search pattern");
                return;
            }
        };
        for path in paths.flatten() {
            if let Some(modified) = dump_mtime(&path) {
                found.insert(path, modified);
            }
        }
    }

    fn walk_into(&self, prefix: &str, found: &mut BTreeMap<PathBuf, SystemTime>) {
        let walker = WalkDir::new(&self.working_dir)
            .max_depth(RECURSIVE_DEPTH)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !skipped_dir(entry.file_name()));
        for entry in walker.filter_map(|entry| entry.ok()) {
            let starts_with_prefix = entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(prefix))
                .unwrap_or(false);
            if !starts_with_prefix {
                continue;
            }
            if let Some(modified) = dump_mtime(entry.path()) {
                found.insert(entry.path().to_path_buf(), modified);
            }
        }
        debug!(root = %self.working_dir.display(), count = found.len(), "recursive core search");
    }
}

fn skipped_dir(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

/// Modification time of a plausible dump file, `None` for anything else.
fn dump_mtime(path: &Path) -> Option<SystemTime> {
    let metadata = std::fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    let text_like = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    if text_like {
        return None;
    }
    metadata.modified().ok()
}

fn newest_first(found: BTreeMap<PathBuf, SystemTime>) -> Vec<PathBuf> {
    let mut entries: Vec<(PathBuf, SystemTime)> = found.into_iter().collect();
    // Paths are already ordered, so equal times keep a stable order.
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries.into_iter().map(|(path, _)| path).collect()
}

fn filter_by_pid(candidates: Vec<PathBuf>, pid: u32) -> Vec<PathBuf> {
    let needle = pid.to_string();
    let matching: Vec<PathBuf> = candidates
        .iter()
        .filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().contains(&needle))
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    if matching.is_empty() {
        candidates
    } else {
        matching
    }
}
