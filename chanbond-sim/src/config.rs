use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

use crate::scenario::ScenarioConfig;

const CONFIG_FILE_NAME: &str = "chanbond-sim.toml";

pub fn default_config_path() -> Result<PathBuf> {
    let proj = ProjectDirs::from("io", "chanbond", "chanbond-sim")
        .context("could not determine platform config directory")?;
    Ok(proj.config_dir().join(CONFIG_FILE_NAME))
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Load a scenario; a missing file yields the empty default scenario
pub fn load(path: &Path) -> Result<ScenarioConfig> {
    if !path.exists() {
        return Ok(ScenarioConfig::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario: {}", path.display()))?;
    let cfg: ScenarioConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
    Ok(cfg)
}

pub fn save(path: &Path, cfg: &ScenarioConfig, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        anyhow::bail!(
            "scenario already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    ensure_parent_dir(path)?;
    let raw = toml::to_string_pretty(cfg).context("failed to serialize scenario to TOML")?;
    fs::write(path, raw)
        .with_context(|| format!("failed to write scenario: {}", path.display()))?;
    Ok(())
}
