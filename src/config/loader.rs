use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::types::Config;

/// File name looked up in the working directory.
pub const CONFIG_FILE: &str = "dockyard.yaml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "DOCKYARD_CONFIG";

/// Load config from `dockyard.yaml` in the given directory, falling back to
/// defaults when the file does not exist.
pub fn load(dir: &Path) -> Result<Config> {
    let path = dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(Config::default());
    }
    load_file(&path)
}

/// Load config from an explicit path. A missing file is an error here.
pub fn load_file(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("invalid config {}", path.display()))
}

/// Resolve the config for a process started in `cwd`: `$DOCKYARD_CONFIG`
/// when set, otherwise `dockyard.yaml` in `cwd`.
pub fn resolve(cwd: &Path, explicit: Option<PathBuf>) -> Result<Config> {
    match explicit {
        Some(path) => load_file(&path),
        None => load(cwd),
    }
}
