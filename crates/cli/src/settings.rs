//! Layered settings: built-in defaults, TOML file, `ESTHER_*` environment

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use esther_core::application::MonitorConfig;
use esther_core::domain::TriggerSettings;

pub const CONFIG_FILE_NAME: &str = "esther-trigger.toml";
pub const ENV_PREFIX: &str = "ESTHER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub format: LogFormat,
    /// EnvFilter directives, overridden by `RUST_LOG`
    pub level: String,
    /// Also write JSON logs to a daily file in this directory
    pub dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "warn".to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub monitor: MonitorConfig,
    /// Working directory of the acquisition executable
    pub working_dir: Option<PathBuf>,
    pub trigger: TriggerSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Load settings from `path`, or from the platform config dir if present
    ///
    /// An explicit path must exist; the platform file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&Settings::default()).context("Failed to encode default settings")?,
        );

        builder = match path {
            Some(path) => builder.add_source(File::from(path.to_path_buf()).required(true)),
            None => match default_config_path() {
                Some(default) => builder.add_source(File::from(default).required(false)),
                None => builder,
            },
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")
    }
}

/// `<config dir>/esther-trigger.toml` for the current platform
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "esther", "esther-trigger")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
