//! Application configuration for bidforge.
//!
//! User config lives at `~/.bidforge/bidforge.toml`.
//! CLI flags override config file values, which override defaults.
//! The API key itself is never stored — only the name of the environment
//! variable holding it, resolved at the CLI entry point.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BidforgeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "bidforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".bidforge";

// ---------------------------------------------------------------------------
// Config structs (matching bidforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Generation-service settings.
    #[serde(default)]
    pub dashscope: DashscopeConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default working directory for build artifacts and the cache.
    #[serde(default = "default_workdir")]
    pub workdir: String,

    /// Default number of ranked candidates retained per requirement.
    #[serde(default = "default_topk")]
    pub topk: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            topk: default_topk(),
        }
    }
}

fn default_workdir() -> String {
    "build".into()
}
fn default_topk() -> usize {
    5
}

/// `[dashscope]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashscopeConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Service base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Candidate model identifiers, tried in order on request rejection.
    #[serde(default = "default_models")]
    pub models: Vec<String>,

    /// Default sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Default completion token budget.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Total attempts per request before a transient failure becomes fatal.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for DashscopeConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            models: default_models(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_api_key_env() -> String {
    "DASHSCOPE_API_KEY".into()
}
fn default_base_url() -> String {
    "https://dashscope.aliyuncs.com/api/v1".into()
}
fn default_models() -> Vec<String> {
    vec!["qwen-plus".into(), "qwen-turbo".into()]
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_max_retries() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.bidforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BidforgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.bidforge/bidforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BidforgeError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        BidforgeError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BidforgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BidforgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BidforgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the API key env var is set and non-empty, returning the key.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.dashscope.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(BidforgeError::config(format!(
            "DashScope API key not found. Set the {var_name} environment variable."
        ))),
    }
}
