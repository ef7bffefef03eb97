//! Layered runtime configuration: built-in defaults, overridden by
//! `csm-orc.toml` if present, overridden again by `CSM_ORC_`-prefixed
//! environment variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

const ENV_PREFIX: &str = "CSM_ORC_";

/// Resolved runtime configuration for one orchestrator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root directory scanned for plugin subdirectories.
    pub plugin_root: PathBuf,

    /// Whether exit handlers run automatically after every `run` invocation.
    pub run_exit_handlers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugin_root: default_plugin_root(),
            run_exit_handlers: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    plugin_root: Option<PathBuf>,
    #[serde(default)]
    run_exit_handlers: Option<bool>,
}

impl Config {
    /// Loads configuration layered as defaults, then `csm-orc.toml` in the
    /// current directory (if present), then `CSM_ORC_`-prefixed environment
    /// variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("csm-orc.toml"), &std::env::vars().collect())
    }

    /// Testable variant of [`Config::load`] that takes an explicit file path
    /// and environment snapshot instead of reading the real process state.
    pub fn load_from(toml_path: &Path, env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if toml_path.is_file() {
            let contents = std::fs::read_to_string(toml_path).map_err(|source| ConfigError::Io {
                path: toml_path.display().to_string(),
                source,
            })?;
            let file_config: FileConfig = toml::from_str(&contents).map_err(|source| ConfigError::Toml {
                path: toml_path.display().to_string(),
                source,
            })?;
            if let Some(plugin_root) = file_config.plugin_root {
                config.plugin_root = plugin_root;
            }
            if let Some(run_exit_handlers) = file_config.run_exit_handlers {
                config.run_exit_handlers = run_exit_handlers;
            }
        }

        if let Some(plugin_root) = env.get(&format!("{ENV_PREFIX}PLUGIN_ROOT")) {
            config.plugin_root = PathBuf::from(plugin_root);
        }
        if let Some(run_exit_handlers) = env.get(&format!("{ENV_PREFIX}RUN_EXIT_HANDLERS")) {
            config.run_exit_handlers = parse_bool(run_exit_handlers).unwrap_or(config.run_exit_handlers);
        }

        Ok(config)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn default_plugin_root() -> PathBuf {
    dirs_plugin_root().unwrap_or_else(|| PathBuf::from(".csm-orc/plugins"))
}

fn dirs_plugin_root() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| Path::new(&home).join(".config").join("csm-orc").join("plugins"))
}

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is not valid TOML: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
