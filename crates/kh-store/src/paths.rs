use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::error::{Result, StoreError};
use crate::store::Store;

pub const DB_FILE: &str = "kh.db";
pub const CONFIG_FILE: &str = "kh.toml";
pub const DATA_DIR_ENV: &str = "KH_DATA_DIR";

/// Default base directory for all hub storage.
fn default_base_dir() -> PathBuf {
    dirs_home().join(".kai-hub")
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// `$KH_DATA_DIR` when set and non-empty, else `~/.kai-hub`.
pub fn data_dir() -> PathBuf {
    match env::var(DATA_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => default_base_dir(),
    }
}

pub fn db_path(dir: &Path) -> PathBuf {
    dir.join(DB_FILE)
}

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Open the store inside `dir`, creating the directory as needed.
pub fn open_in_dir(dir: &Path) -> Result<Store> {
    fs::create_dir_all(dir).map_err(|e| {
        StoreError::InvalidData(format!("failed to create {}: {e}", dir.display()))
    })?;
    let path = db_path(dir);
    tracing::debug!(path = %path.display(), "opening store");
    Store::open(&path)
}
