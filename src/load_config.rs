//! `load_config`: reads the optional YAML settings file and layers environment
//! and command-line overrides on top of it.
//!
//! Precedence, lowest first: built-in defaults, the YAML file, `CFCP_CF_BINARY`,
//! command-line flags. Every key in the file is optional; unknown keys are an
//! error so typos don't silently fall back to defaults.
//!
//! ```yaml
//! cf_binary: cf
//! transport: ssh
//! transfer_timeout_secs: 120
//! print_commands: false
//! verify_host_key: true
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use cfcp_core::copier::DEFAULT_TRANSFER_TIMEOUT;
use cfcp_core::transport::TransportKind;
use serde::Deserialize;
use tracing::{error, info};

/// Environment variable that overrides `cf_binary`.
pub const CF_BINARY_ENV: &str = "CFCP_CF_BINARY";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub cf_binary: String,
    pub transport: TransportKind,
    pub transfer_timeout_secs: u64,
    pub print_commands: bool,
    pub verify_host_key: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cf_binary: "cf".to_owned(),
            transport: TransportKind::default(),
            transfer_timeout_secs: DEFAULT_TRANSFER_TIMEOUT.as_secs(),
            print_commands: false,
            verify_host_key: true,
        }
    }
}

impl Settings {
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

/// Loads settings from `path` (or defaults when `None`) and applies `CFCP_CF_BINARY`.
pub fn load_config(path: Option<&Path>) -> Result<Settings> {
    let mut settings = match path {
        Some(path) => read_settings(path)?,
        None => Settings::default(),
    };

    if let Ok(binary) = std::env::var(CF_BINARY_ENV) {
        if !binary.trim().is_empty() {
            info!(cf_binary = %binary, "Using cf binary from environment");
            settings.cf_binary = binary;
        }
    }

    if settings.transfer_timeout_secs == 0 {
        anyhow::bail!("transfer_timeout_secs must be greater than zero");
    }
    Ok(settings)
}

fn read_settings(path: &Path) -> Result<Settings> {
    info!(config_path = ?path, "Loading configuration from file");

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path,
                e
            ));
        }
    };

    // an empty file is a valid, all-defaults config
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }

    match serde_yaml::from_str::<Settings>(&content) {
        Ok(settings) => {
            info!(config_path = ?path, ?settings, "Parsed config YAML successfully");
            Ok(settings)
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML: {e}"))
        }
    }
}
