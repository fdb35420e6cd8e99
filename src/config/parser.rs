use super::Settings;
use crate::constants::{CONFIG_FILE_NAME, HOME_DIR_NAME};
use crate::errors::Error;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

/// Picks the queue's home directory
///
/// An explicit `--home` (or `ATLASRUN_HOME`, which clap folds into it) wins,
/// otherwise `~/.atlasrun`.
pub fn resolve_home(explicit: Option<&Path>) -> Result<PathBuf, Error> {
    match explicit {
        Some(home) => Ok(home.to_path_buf()),
        None => dirs::home_dir()
            .map(|dir| dir.join(HOME_DIR_NAME))
            .ok_or(Error::NoHomeDir),
    }
}

/// Loads settings and creates the directories they point at
///
/// # Arguments
///
/// * `home` - Queue home directory
/// * `config_path` - Explicit config file; defaults to `<home>/config.yaml`
///
/// # Errors
///
/// Returns an error if:
/// * An explicitly given config file cannot be read
/// * The YAML content cannot be parsed into Settings
/// * One of the directories cannot be created
pub fn load_settings(home: &Path, config_path: Option<&Path>) -> Result<Settings, Error> {
    let default_path = home.join(CONFIG_FILE_NAME);
    let settings = match config_path {
        Some(path) => parse_file(path)?,
        None if default_path.is_file() => parse_file(&default_path)?,
        None => {
            debug!("No config file at {}, using defaults", default_path.display());
            Settings::default()
        }
    }
    .with_home(home);

    fs::create_dir_all(&settings.home)?;
    fs::create_dir_all(settings.log_dir())?;
    fs::create_dir_all(settings.scripts_dir())?;
    if let Some(parent) = settings.database_path().parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(settings)
}

fn parse_file(path: &Path) -> Result<Settings, Error> {
    let yaml_str = fs::read_to_string(path)?;
    let settings: Settings = if yaml_str.trim().is_empty() {
        Settings::default()
    } else {
        serde_yaml::from_str(&yaml_str)?
    };
    info!("Loaded settings from {}", path.display());
    Ok(Settings {
        source: Some(path.to_path_buf()),
        ..settings
    })
}
