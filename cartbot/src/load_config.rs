/// `load_config` module: loads a static YAML config and adapts it into the
/// core's typed configuration.
///
/// This module is the only place where untrusted YAML is parsed. Secrets
/// (API keys for the provider clients) never live in the file; they are
/// injected from the environment by the provider constructors.
///
/// # Errors
/// All errors in this module use `anyhow::Error` for context-rich
/// diagnostics, surfaced at the CLI boundary.
use anyhow::Result;
use cartbot_core::config::CoreConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    /// Directory the JSON file store keeps per-user state in.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub providers: ProvidersSection,
}

#[derive(Debug, Deserialize)]
pub struct ProvidersSection {
    /// "openai" or "none".
    #[serde(default = "provider_none")]
    pub ai: String,
    /// "http" or "none".
    #[serde(default = "provider_none")]
    pub ocr: String,
}

impl Default for ProvidersSection {
    fn default() -> Self {
        ProvidersSection {
            ai: provider_none(),
            ocr: provider_none(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./cartbot-data")
}

fn provider_none() -> String {
    "none".to_owned()
}

impl Default for CliConfig {
    fn default() -> Self {
        CliConfig {
            data_dir: default_data_dir(),
            core: CoreConfig::default(),
            providers: ProvidersSection::default(),
        }
    }
}

/// Loads the YAML config file, or falls back to defaults when no path was
/// given.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let Some(path) = path else {
        info!("No config file given, using defaults");
        return Ok(CliConfig::default());
    };
    info!(config_path = ?path, "Loading configuration from file");

    let config_content = match fs::read_to_string(path) {
        Ok(content) => {
            info!(config_path = ?path, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path,
                e
            ));
        }
    };

    let config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(config) => {
            info!(config_path = ?path, "Parsed config YAML successfully");
            config
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    Ok(config)
}
