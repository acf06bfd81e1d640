//! Configuration management for the gateway.
//!
//! Configuration is stored in TOML format. The search order is:
//! 1. `./gateway-core.toml` (project-local)
//! 2. `~/.config/gateway-core/config.toml` (XDG config)
//!
//! Every section is optional; missing values fall back to defaults.
//!
//! # Usage
//!
//! ```rust,ignore
//! use gateway_core::config;
//!
//! // Load from default search paths
//! let config = config::load()?;
//!
//! // Load from a specific path
//! let config = config::from_path(Path::new("/etc/gateway-core/config.toml"))?;
//! ```

mod file;
mod types;

pub use file::{from_path, from_str, load, search_paths, xdg_config_dir};

pub use types::{ContentConfig, GatewayConfig, OpenAIConfig, ReplicateConfig, ServerConfig};
