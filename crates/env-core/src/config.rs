//! TOML config loading and environment knob helpers.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use serde::de::DeserializeOwned;

/// Minimal config loader shared by the binaries.
///
/// Search order:
/// 1) `ZEROAD_CONFIG_DIR/<relative_path>`
/// 2) `./<relative_path>`
/// 3) `<crate_root>/../../configs/<relative_path>` (repo-local convenience)
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn parse_from_file<T: DeserializeOwned>(relative_path: &str) -> anyhow::Result<T> {
        let path = Self::resolve_path(relative_path)?;
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        Self::parse_from_str(&text)
    }

    pub fn parse_from_str<T: DeserializeOwned>(text: &str) -> anyhow::Result<T> {
        toml::from_str(text).context("Failed to parse TOML")
    }

    fn resolve_path(relative_path: &str) -> anyhow::Result<PathBuf> {
        let rel = Path::new(relative_path);

        if rel.is_absolute() {
            if rel.is_file() {
                return Ok(rel.to_path_buf());
            }
            anyhow::bail!("Config file not found at {}", rel.display());
        }

        if let Some(root) = env::var_os("ZEROAD_CONFIG_DIR") {
            let candidate = PathBuf::from(root).join(rel);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        if let Ok(cwd) = env::current_dir() {
            let candidate = cwd.join(rel);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        // Repo convenience: <repo_root>/configs/<relative_path>.
        // Library crates live at <repo_root>/crates/<name>.
        let candidate = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .ancestors()
            .nth(2)
            .ok_or_else(|| anyhow::anyhow!("CARGO_MANIFEST_DIR has insufficient ancestors"))?
            .join("configs")
            .join(rel);
        if candidate.is_file() {
            return Ok(candidate);
        }

        anyhow::bail!("Config file not found for {:?}", rel);
    }
}

/// Env var or default, treating empty/whitespace values as unset.
pub fn env_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Parsed env var or default; unparseable values fall back to the default.
pub fn env_parse_or<T: FromStr + Copy>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
