//! Configuration file loading.
//!
//! Gateway configuration lives in TOML files at XDG-compliant locations.

use crate::config::types::GatewayConfig;
use crate::error::GatewayError;
use std::path::{Path, PathBuf};

/// Default configuration file name for project-local config.
const LOCAL_CONFIG_NAME: &str = "gateway-core.toml";

/// Default configuration file name within XDG config directory.
const XDG_CONFIG_NAME: &str = "config.toml";

/// Application name for XDG directory lookup.
const APP_NAME: &str = "gateway-core";

/// Loads configuration from the default search paths.
///
/// Search order:
/// 1. `./gateway-core.toml` (project-local)
/// 2. `~/.config/gateway-core/config.toml` (XDG config)
///
/// Returns the default configuration if no config file is found.
///
/// # Errors
///
/// Returns an error if a config file exists but cannot be parsed or fails
/// validation.
pub fn load() -> Result<GatewayConfig, GatewayError> {
    for path in search_paths() {
        if path.exists() {
            tracing::debug!(path = %path.display(), "loading configuration");
            return from_path(&path);
        }
    }

    Ok(GatewayConfig::default())
}

/// Loads configuration from a specific file path.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read
/// - The file contains invalid TOML
/// - A value fails validation
pub fn from_path(path: &Path) -> Result<GatewayConfig, GatewayError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::configuration(
            "config_file",
            format!("failed to read '{}': {}", path.display(), e),
        )
    })?;

    from_str(&contents).map_err(|e| {
        GatewayError::configuration(
            "config_file",
            format!("failed to parse '{}': {}", path.display(), e),
        )
    })
}

/// Parses and validates configuration from a TOML string.
///
/// # Errors
///
/// Returns an error if the TOML is invalid, doesn't match the schema, or a
/// value fails validation.
pub fn from_str(toml_str: &str) -> Result<GatewayConfig, GatewayError> {
    let config: GatewayConfig = toml::from_str(toml_str)
        .map_err(|e| GatewayError::configuration("config", format!("invalid TOML: {e}")))?;

    config.validate()?;
    Ok(config)
}

/// Returns the paths that would be searched for configuration files.
#[must_use]
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_NAME)];

    if let Some(dir) = xdg_config_dir() {
        paths.push(dir.join(XDG_CONFIG_NAME));
    }

    paths
}

/// Returns the path to the XDG config directory for the gateway.
///
/// This is `~/.config/gateway-core` on most systems.
#[must_use]
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME))
}
