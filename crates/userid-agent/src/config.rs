//! Runtime configuration.
//!
//! Configuration lives in one JSON file. A missing file is not an error: a
//! template with every default is written in its place so an operator has
//! something concrete to edit, and the defaults are used for the run.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

/// Sentinel vsys value meaning "send no vsys attribute at all".
pub const VSYS_NONE: &str = "none";

/// One policy-enforcement endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL of the device, without the trailing `/api`.
    pub url: String,
    /// API key used to authenticate every call.
    pub api_key: String,
    /// Target vsys, or [`VSYS_NONE`] to omit the attribute.
    pub vsys: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            url: "https://192.168.1.1".to_string(),
            api_key: "0000".to_string(),
            vsys: VSYS_NONE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Buffered entries that trigger an immediate flush.
    pub max_pending_entries: usize,
    /// Timeout in minutes stamped on every login entry. A long value is
    /// safe: the matching stop record clears the entry explicitly.
    pub userid_timeout: u32,
    /// Milliseconds between periodic buffer flushes.
    pub panos_buffered_time: u64,
    /// Domain prepended to user names that arrive unqualified.
    pub default_domain: String,
    /// Only records fully matching this pattern are processed.
    pub include_pattern: String,
    /// Send tagged dynamic address objects alongside identity updates.
    pub dyn_address_feature: bool,
    /// Directory holding the accounting logs. Must be used exclusively for
    /// them; files carry a `.log` extension.
    pub log_dir: PathBuf,
    pub log_level: String,
    pub primary: EndpointConfig,
    pub secondary: EndpointConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_pending_entries: 100,
            userid_timeout: 1440,
            panos_buffered_time: 2000,
            default_domain: "corppro".to_string(),
            include_pattern: ".*".to_string(),
            dyn_address_feature: false,
            log_dir: PathBuf::from("C:/Windows/System32/LogFiles"),
            log_level: "info".to_string(),
            primary: EndpointConfig::default(),
            secondary: EndpointConfig {
                url: "https://192.168.1.2".to_string(),
                ..EndpointConfig::default()
            },
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let config = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("invalid configuration file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let template = Config::default();
                let rendered = serde_json::to_string_pretty(&template)
                    .context("failed to render the configuration template")?;
                std::fs::write(path, rendered).with_context(|| {
                    format!("failed to write the configuration template {}", path.display())
                })?;
                template
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read configuration {}", path.display()))
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.max_pending_entries == 0 {
            bail!("max_pending_entries must be greater than zero");
        }
        if self.userid_timeout == 0 {
            bail!("userid_timeout must be greater than zero");
        }
        if self.panos_buffered_time == 0 {
            bail!("panos_buffered_time must be greater than zero");
        }
        Ok(())
    }
}
