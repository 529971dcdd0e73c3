// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::Config;
use crate::config::validate::validate_config;
use crate::errors::{LightflowError, Result};

/// Load a configuration file from a given path.
///
/// This only performs YAML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|err| {
        LightflowError::Config(format!("reading config file at {:?}: {}", path, err))
    })?;

    let config: Config = serde_yaml::from_str(&contents).map_err(|err| {
        LightflowError::Config(format!("parsing YAML config from {:?}: {}", path, err))
    })?;

    Ok(config)
}

/// Load a configuration file from path and run basic validation.
///
/// This is the recommended entry point for the rest of the application.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Config> {
    let config = load_from_path(&path)?;
    validate_config(&config)?;
    Ok(config)
}

/// Resolve the configuration for a CLI invocation: an explicit `--config`
/// path must exist; otherwise the default path is used when present, and the
/// built-in defaults apply when it is not.
pub fn load_or_default(explicit: Option<&str>) -> Result<Config> {
    match explicit {
        Some(path) => load_and_validate(path),
        None => {
            let path = default_config_path();
            if path.exists() {
                load_and_validate(path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

/// Default config path: `lightflow.cfg` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("lightflow.cfg")
}
