use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::ForgeError;

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

pub fn ensure_dir(path: &Path) -> Result<(), ForgeError> {
    fs::create_dir_all(path)
        .map_err(|err| ForgeError::Filesystem(format!("create {}: {err}", path.display())))
}

/// Removes a file, treating "already gone" as success.
pub fn remove_file_if_exists(path: &Path) -> Result<(), ForgeError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ForgeError::Filesystem(format!(
            "remove {}: {err}",
            path.display()
        ))),
    }
}

pub fn remove_dir_if_exists(path: &Path) -> Result<(), ForgeError> {
    if path.exists() {
        fs::remove_dir_all(path)
            .map_err(|err| ForgeError::Filesystem(format!("remove {}: {err}", path.display())))?;
    }
    Ok(())
}

pub fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|meta| meta.len())
}

/// Writes pretty JSON plus a trailing newline, replacing `path` atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ForgeError> {
    let parent = path
        .parent()
        .ok_or_else(|| ForgeError::Filesystem("invalid destination path".to_string()))?;
    ensure_dir(parent)?;
    let mut content =
        serde_json::to_vec_pretty(value).map_err(|err| ForgeError::Filesystem(err.to_string()))?;
    content.push(b'\n');
    let mut temp = tempfile::Builder::new()
        .prefix(".scenery-forge")
        .tempfile_in(parent)
        .map_err(|err| ForgeError::Filesystem(err.to_string()))?;
    temp.write_all(&content)
        .map_err(|err| ForgeError::Filesystem(err.to_string()))?;
    temp.persist(path)
        .map_err(|err| ForgeError::Filesystem(err.to_string()))?;
    Ok(())
}
