use std::path::Path;

use anyhow::{Context, Result, anyhow};

use super::types::HarnessConfig;

pub const CONFIG_FILE: &str = ".kongtest.yaml";

/// Load `.kongtest.yaml` from `dir`, falling back to defaults when the file
/// does not exist, then apply `KONGTEST_*` overrides from the environment.
pub fn load(dir: &Path) -> Result<HarnessConfig> {
    load_with(dir, |key| std::env::var(key).ok())
}

/// Load a config file. Relative paths inside it are taken relative to the
/// file's directory.
pub fn load_file(path: &Path) -> Result<HarnessConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut cfg: HarnessConfig = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    cfg.resolve_paths(path.parent().unwrap_or(Path::new(".")));
    cfg.validate()
        .map_err(|e| anyhow!("invalid config {}: {e}", path.display()))?;
    Ok(cfg)
}

fn load_with(dir: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<HarnessConfig> {
    let path = dir.join(CONFIG_FILE);
    let mut cfg = if path.exists() {
        load_file(&path)?
    } else {
        HarnessConfig::default()
    };
    cfg.apply_env_overrides(lookup);
    Ok(cfg)
}
