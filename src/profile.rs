// SPDX-License-Identifier: PMPL-1.0-or-later

//! Stress profile loading for per-engine argument and option sets.

use crate::types::StressConfig;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StressProfile {
    #[serde(default)]
    pub engine_args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Sent as `setoption` during the handshake. Scalars are stringified.
    #[serde(default)]
    pub uci_options: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub depth: Option<u32>,
    #[serde(default)]
    pub max_moves: Option<u32>,
    #[serde(default)]
    pub mem_limit_mb: Option<f64>,
    #[serde(default)]
    pub spin_sec: Option<f64>,
}

impl StressProfile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading stress profile {}", path.display()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("parsing json stress profile {}", path.display())),
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("parsing yaml stress profile {}", path.display())),
            _ => Err(anyhow!(
                "unsupported stress profile extension for {}",
                path.display()
            )),
        }
    }

    /// Overlays the profile on `config`. CLI overrides are applied afterwards by the caller.
    pub fn apply(&self, config: &mut StressConfig) -> Result<()> {
        config.engine_args.extend(self.engine_args.iter().cloned());
        config
            .env
            .extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        for (name, value) in &self.uci_options {
            config.uci_options.insert(name.clone(), option_value(name, value)?);
        }
        if let Some(depth) = self.depth {
            config.depth = depth;
        }
        if let Some(max_moves) = self.max_moves {
            config.max_moves = max_moves;
        }
        if let Some(mem) = self.mem_limit_mb {
            config.mem_limit_mb = mem;
        }
        if let Some(spin) = self.spin_sec {
            config.spin = Duration::try_from_secs_f64(spin)
                .map_err(|_| anyhow!("spin_sec must be a non-negative number, got {}", spin))?;
        }
        Ok(())
    }
}

fn option_value(name: &str, value: &serde_yaml::Value) -> Result<String> {
    use serde_yaml::Value;
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Number(number) => Ok(number.to_string()),
        _ => Err(anyhow!("uci option '{}' must be a string, number or bool", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn yaml_profile_overlays_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "asan.yaml",
            "engine_args: [\"--bench-off\"]\nuci_options:\n  Hash: 64\n  Threads: 2\n  Ponder: false\nspin_sec: 2.5\ndepth: 8\n",
        );
        let profile = StressProfile::load(&path).unwrap();
        let mut config = StressConfig::new("/opt/engine");
        profile.apply(&mut config).unwrap();

        assert_eq!(config.engine_args, vec!["--bench-off".to_string()]);
        assert_eq!(config.uci_options.get("Hash").map(String::as_str), Some("64"));
        assert_eq!(config.uci_options.get("Ponder").map(String::as_str), Some("false"));
        assert_eq!(config.spin, Duration::from_millis(2500));
        assert_eq!(config.depth, 8);
        assert_eq!(config.max_moves, StressConfig::DEFAULT_MAX_MOVES);
    }

    #[test]
    fn json_profile_sets_environment() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "profile.json",
            r#"{"env": {"ASAN_OPTIONS": "detect_leaks=0"}, "mem_limit_mb": 512}"#,
        );
        let mut config = StressConfig::new("/opt/engine");
        StressProfile::load(&path).unwrap().apply(&mut config).unwrap();
        assert_eq!(
            config.env.get("ASAN_OPTIONS").map(String::as_str),
            Some("detect_leaks=0")
        );
        assert_eq!(config.mem_limit_mb, 512.0);
    }

    #[test]
    fn unknown_extensions_and_fields_are_rejected() {
        let dir = TempDir::new().unwrap();
        let toml = write(&dir, "profile.toml", "depth = 3");
        assert!(StressProfile::load(&toml).is_err());

        let typo = write(&dir, "typo.json", r#"{"dpeth": 3}"#);
        assert!(StressProfile::load(&typo).is_err());
    }

    #[test]
    fn negative_spin_is_an_error() {
        let profile = StressProfile {
            spin_sec: Some(-1.0),
            ..StressProfile::default()
        };
        let mut config = StressConfig::new("/opt/engine");
        assert!(profile.apply(&mut config).is_err());
    }
}
