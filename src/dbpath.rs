use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

pub const META_FILE: &str = "meta.toml";
pub const LOCK_FILE: &str = "LOCK";
pub const CATALOG_FILE: &str = "catalog.redb";

pub fn shard_file(shard: usize) -> String {
    format!("shard-{shard}.redb")
}

fn is_name_only(s: &str) -> bool {
    !s.contains('/') && !s.contains('\\')
}

pub fn default_data_base_dir() -> Result<PathBuf> {
    let proj = ProjectDirs::from("org", "blocksync", "blocksync")
        .ok_or_else(|| anyhow!("Unable to determine platform data directory"))?;
    Ok(proj.data_dir().to_path_buf())
}

/// A bare name lives under the platform data dir; anything with a separator is a path.
pub fn resolve_data_dir(data: &str) -> Result<PathBuf> {
    if is_name_only(data) {
        Ok(default_data_base_dir()?.join(data))
    } else {
        Ok(PathBuf::from(data))
    }
}

/// Ensure the data directory exists and either is empty or looks like ours.
/// A missing directory is created and treated as empty.
pub fn ensure_data_dir_is_valid_or_empty(dir: &Path) -> Result<DataDirState> {
    if dir.exists() {
        if !dir.is_dir() {
            return Err(anyhow!("Data path exists but is not a directory"));
        }

        let mut entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory {}", dir.display()))?;
        if entries.next().is_none() {
            return Ok(DataDirState::Empty);
        }

        if dir.join(META_FILE).is_file() {
            Ok(DataDirState::LooksValid)
        } else {
            Err(anyhow!(
                "Directory exists but does not look like a blocksync data directory (expected {})",
                META_FILE
            ))
        }
    } else {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(DataDirState::Empty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirState {
    /// Directory exists but is empty, or it was created just now.
    Empty,
    /// Directory contains meta.toml.
    LooksValid,
}
