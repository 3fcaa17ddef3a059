//! Configuration file and root folder resolution

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "NXT_ROOT_FOLDER";

/// File name of the research agent configuration
pub const CONFIG_FILE_NAME: &str = "nxt-ra.toml";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "nxt.db";

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. `root_folder` key of the TOML config file
/// 4. OS-dependent compiled default
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    config_file: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    if let Some(config_path) = config_file {
        let content = std::fs::read_to_string(config_path)?;
        let config = toml::from_str::<toml::Value>(&content)
            .map_err(|e| Error::Config(format!("{}: {}", config_path.display(), e)))?;
        if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
            return Ok(PathBuf::from(root_folder));
        }
    }

    Ok(default_root_folder())
}

/// Locate the config file: an explicit path must exist; otherwise the
/// per-user location and then `/etc/nxt` are checked.
pub fn locate_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let user_config = dirs::config_dir().map(|d| d.join("nxt").join(CONFIG_FILE_NAME));
    if let Some(path) = user_config {
        if path.exists() {
            return Ok(Some(path));
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/nxt").join(CONFIG_FILE_NAME);
        if system_config.exists() {
            return Ok(Some(system_config));
        }
    }

    Ok(None)
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/nxt
        dirs::data_local_dir()
            .map(|d| d.join("nxt"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/nxt"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("nxt"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/nxt"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("nxt"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\nxt"))
    } else {
        PathBuf::from("./nxt_data")
    }
}

/// Path of the SQLite database under a root folder
pub fn database_path(root: &Path) -> PathBuf {
    root.join(DATABASE_FILE_NAME)
}

/// Directory holding exported presentation artifacts
pub fn data_dir(root: &Path) -> PathBuf {
    root.join("data")
}

/// Directory holding curated feed drops, one subdirectory per project
pub fn feeds_dir(root: &Path) -> PathBuf {
    root.join("feeds")
}
