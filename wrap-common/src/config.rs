//! Configuration loading helpers
//!
//! Bootstrap configuration lives in a TOML file. Resolution order for the
//! file path:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. `<config_dir>/wrap/<module>.toml`
//!
//! A missing file is not an error: callers get built-in defaults and a
//! warning. Secrets resolve ENV → TOML.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{Error, Result};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve the configuration file path for `module`
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    module: &str,
) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir().map(|d| d.join("wrap").join(format!("{}.toml", module)))
}

/// Load a TOML file, falling back to defaults when the file does not exist
///
/// A file that exists but cannot be read or parsed is an error.
pub fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        warn!("No configuration path resolved, using built-in defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Resolve a secret from the environment first, then from TOML
///
/// Warns when both sources carry a value, since the TOML one is then ignored.
pub fn resolve_secret(env_var_name: &str, toml_value: Option<&str>) -> Option<String> {
    let env_value = std::env::var(env_var_name).ok().filter(|v| is_valid_key(v));
    let toml_value = toml_value.filter(|v| is_valid_key(v));

    match (env_value, toml_value) {
        (Some(env), Some(_)) => {
            warn!(
                "{} set in both environment and TOML config. Using environment.",
                env_var_name
            );
            Some(env)
        }
        (Some(env), None) => {
            info!("{} loaded from environment variable", env_var_name);
            Some(env)
        }
        (None, Some(toml)) => {
            info!("{} loaded from TOML config", env_var_name);
            Some(toml.to_string())
        }
        (None, None) => None,
    }
}

/// Validate a key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
