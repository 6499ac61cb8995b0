//! Run configuration stored in `statetree.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// File name looked up next to the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "statetree.toml";

/// Run configuration (TOML).
///
/// Every field is optional; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Stop after this many ticks if the graph is still running.
    pub max_ticks: u32,

    /// Simulated seconds passed to every `tick`.
    pub tick_delta_secs: f32,

    /// Owner name the instance runs on behalf of.
    pub owner: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_ticks: 1000,
            tick_delta_secs: 0.1,
            owner: "statetree".to_string(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_ticks == 0 {
            return Err(anyhow!("max_ticks must be > 0"));
        }
        if !self.tick_delta_secs.is_finite() || self.tick_delta_secs < 0.0 {
            return Err(anyhow!("tick_delta_secs must be finite and >= 0"));
        }
        if self.owner.trim().is_empty() {
            return Err(anyhow!("owner must be non-empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    if !path.exists() {
        let cfg = RunConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);
    fs::write(tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("statetree.toml");
        let cfg = RunConfig {
            max_ticks: 12,
            tick_delta_secs: 0.5,
            owner: "npc".to_string(),
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    /// Partial files keep defaults for the fields they omit.
    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("statetree.toml");
        fs::write(&path, "max_ticks = 5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_ticks, 5);
        assert_eq!(cfg.owner, "statetree");
    }

    #[test]
    fn zero_max_ticks_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("statetree.toml");
        fs::write(&path, "max_ticks = 0\n").expect("write");
        let err = load_config(&path).expect_err("should fail");
        assert!(format!("{err:#}").contains("max_ticks must be > 0"));
    }
}
