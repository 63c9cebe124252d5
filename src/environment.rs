// SPDX-License-Identifier: PMPL-1.0-or-later

//! Subject process environment and core-dump preparation.

use std::collections::BTreeMap;

pub const SANITIZER_ENV: &str = "ASAN_OPTIONS";
pub const SANITIZER_DEFAULTS: &str = "detect_leaks=1:halt_on_error=1:abort_on_error=1";

/// Extra environment variables for a subject process.
///
/// `current` is the variable lookup of the harness process; a sanitizer
/// configuration the operator already exported is left untouched.
pub fn subject_environment<F>(extra: &BTreeMap<String, String>, current: F) -> Vec<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    let mut vars: Vec<(String, String)> = extra
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    if cfg!(unix)
        && current(SANITIZER_ENV).is_none()
        && !extra.contains_key(SANITIZER_ENV)
    {
        vars.push((SANITIZER_ENV.to_string(), SANITIZER_DEFAULTS.to_string()));
    }
    vars
}

/// Raises the core-dump size limit for this process and its children.
///
/// Tries unlimited first; without privileges the soft limit is lifted to the
/// existing hard limit instead.
#[cfg(unix)]
pub fn enable_core_dumps() -> Result<(), String> {
    use nix::sys::resource::{getrlimit, setrlimit, Resource, RLIM_INFINITY};

    if setrlimit(Resource::RLIMIT_CORE, RLIM_INFINITY, RLIM_INFINITY).is_ok() {
        return Ok(());
    }
    let (_, hard) = getrlimit(Resource::RLIMIT_CORE).map_err(|err| err.to_string())?;
    if hard == 0 {
        return Err("hard core limit is 0".to_string());
    }
    setrlimit(Resource::RLIMIT_CORE, hard, hard).map_err(|err| err.to_string())
}

#[cfg(not(unix))]
pub fn enable_core_dumps() -> Result<(), String> {
    Err("core dump limits are not adjustable on this platform".to_string())
}
