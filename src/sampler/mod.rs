// SPDX-License-Identifier: PMPL-1.0-or-later

//! Point-in-time memory and CPU sampling of a subject process.
//!
//! Linux reads `/proc/<pid>/status` and the per-thread `stat` files. macOS
//! and Windows go through `sysinfo`. Thread CPU accounting that is denied by
//! the OS is reported as zero rather than failing the caller.

use crate::error::SampleError;
use crate::types::ResourceSample;
use std::io::ErrorKind;

/// Source of resource readings; the worker samples once per step.
pub trait ResourceProbe: Send {
    fn sample(&self, pid: u32) -> Result<ResourceSample, SampleError>;
}

/// Reads live statistics from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSampler;

impl ResourceProbe for ProcessSampler {
    fn sample(&self, pid: u32) -> Result<ResourceSample, SampleError> {
        sample(pid)
    }
}

/// Samples resident memory and summed thread CPU time of `pid`.
pub fn sample(pid: u32) -> Result<ResourceSample, SampleError> {
    #[cfg(target_os = "linux")]
    {
        linux::sample(pid)
    }
    #[cfg(not(target_os = "linux"))]
    {
        portable::sample(pid)
    }
}

/// Maps permission failures to "no data" so callers can substitute zero.
fn tolerate_denied<T: Default>(result: Result<T, SampleError>) -> Result<T, SampleError> {
    match result {
        Err(SampleError::Io(err)) if err.kind() == ErrorKind::PermissionDenied => Ok(T::default()),
        other => other,
    }
}

/// Parses `VmRSS:   123456 kB` out of a `/proc/<pid>/status` document.
pub fn parse_status_rss(status: &str) -> Result<u64, SampleError> {
    let line = status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .ok_or_else(|| SampleError::Parse("VmRSS missing".to_string()))?;
    let kb: u64 = line
        .split_whitespace()
        .nth(1)
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| SampleError::Parse(format!("bad VmRSS line '{}'", line)))?;
    Ok(kb * 1024)
}

/// Parses utime + stime (fields 14 and 15) of a `stat` line into seconds.
pub fn parse_stat_cpu_seconds(stat: &str, ticks_per_second: f64) -> Result<f64, SampleError> {
    // comm (field 2) may contain spaces and parentheses; split after the last ')'.
    let after_comm = stat
        .rsplit_once(')')
        .map(|(_, rest)| rest)
        .ok_or_else(|| SampleError::Parse("stat without comm".to_string()))?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // Field 3 is index 0 here, so utime/stime (14, 15) sit at 11 and 12.
    let tick = |index: usize| -> Result<u64, SampleError> {
        fields
            .get(index)
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| SampleError::Parse(format!("stat field {} missing", index + 3)))
    };
    Ok((tick(11)? + tick(12)?) as f64 / ticks_per_second)
}

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    pub(super) fn sample(pid: u32) -> Result<ResourceSample, SampleError> {
        let root = PathBuf::from(format!("/proc/{}", pid));
        let status = fs::read_to_string(root.join("status")).map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                SampleError::Unavailable { pid }
            } else {
                SampleError::Io(err)
            }
        })?;
        let resident_bytes = parse_status_rss(&status)?;
        let cpu_seconds = tolerate_denied(thread_cpu_seconds(&root))?;
        Ok(ResourceSample {
            resident_bytes,
            cpu_seconds,
        })
    }

    /// `USER_HZ` when `sysconf` cannot report it.
    const DEFAULT_CLOCK_TICKS: f64 = 100.0;

    /// Clock ticks per second as reported by the kernel.
    pub(super) fn clock_ticks() -> f64 {
        use nix::unistd::{sysconf, SysconfVar};

        match sysconf(SysconfVar::CLK_TCK) {
            Ok(Some(ticks)) if ticks > 0 => ticks as f64,
            _ => DEFAULT_CLOCK_TICKS,
        }
    }

    fn thread_cpu_seconds(root: &std::path::Path) -> Result<f64, SampleError> {
        let ticks = clock_ticks();
        let mut total = 0.0;
        for entry in fs::read_dir(root.join("task"))? {
            let stat_path = entry?.path().join("stat");
            match fs::read_to_string(&stat_path) {
                Ok(stat) => total += parse_stat_cpu_seconds(&stat, ticks)?,
                // Threads can exit between listing and reading.
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(SampleError::Io(err)),
            }
        }
        Ok(total)
    }
}

#[cfg(not(target_os = "linux"))]
mod portable {
    use super::*;
    use sysinfo::{Pid, ProcessesToUpdate, System};

    pub(super) fn sample(pid: u32) -> Result<ResourceSample, SampleError> {
        let target = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        let process = system
            .process(target)
            .ok_or(SampleError::Unavailable { pid })?;
        Ok(ResourceSample {
            resident_bytes: process.memory(),
            // Summed over every thread of the process.
            cpu_seconds: process.accumulated_cpu_time() as f64 / 1000.0,
        })
    }
}
