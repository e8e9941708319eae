//! Daemon and per-application configuration parsing and validation.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::run::BrowserMode;
use crate::{AppError, Result};

/// File name of the per-application configuration at the app root.
pub const APP_CONFIG_FILENAME: &str = "localrun.toml";

/// Update-check settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct UpdateConfig {
    /// Endpoint returning the latest release as JSON; checks are off when unset.
    #[serde(default)]
    pub check_url: Option<String>,
    /// Interval between update checks.
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
    /// Command (argv) that installs the newest release.
    #[serde(default)]
    pub upgrade_command: Vec<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            check_url: None,
            check_interval_seconds: default_check_interval(),
            upgrade_command: Vec::new(),
        }
    }
}

fn default_check_interval() -> u64 {
    6 * 60 * 60
}

fn default_ipc_name() -> String {
    "localrun".into()
}

fn default_dashboard_base_url() -> String {
    "http://localhost:9400".into()
}

fn default_mcp_base_url() -> String {
    "http://localhost:9400/mcp".into()
}

fn default_first_run_delay() -> u64 {
    5
}

fn default_stop_grace() -> u64 {
    5
}

/// Global daemon configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding the daemon database and state.
    pub data_dir: PathBuf,
    /// Named pipe / Unix socket identifier.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Base URL of the development dashboard.
    #[serde(default = "default_dashboard_base_url")]
    pub dashboard_base_url: String,
    /// Base URL of the MCP endpoint served alongside the dashboard.
    #[serde(default = "default_mcp_base_url")]
    pub mcp_base_url: String,
    /// Delay before first-run guidance is shown for a still-running app.
    #[serde(default = "default_first_run_delay")]
    pub first_run_delay_seconds: u64,
    /// Grace period between SIGTERM and kill when stopping an app.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_seconds: u64,
    /// Update-check settings.
    #[serde(default)]
    pub update: UpdateConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the `SQLite` database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("localrun.db")
    }

    /// Delay before first-run guidance.
    #[must_use]
    pub fn first_run_delay(&self) -> Duration {
        Duration::from_secs(self.first_run_delay_seconds)
    }

    /// Grace period when stopping an app process.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.ipc_name.trim().is_empty() {
            return Err(AppError::Config("ipc_name must not be empty".into()));
        }

        if self.update.check_url.is_some() && self.update.check_interval_seconds == 0 {
            return Err(AppError::Config(
                "update.check_interval_seconds must be greater than zero".into(),
            ));
        }

        fs::create_dir_all(&self.data_dir)
            .map_err(|err| AppError::Config(format!("cannot create data_dir: {err}")))?;
        self.data_dir = self
            .data_dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("data_dir invalid: {err}")))?;

        self.dashboard_base_url = self.dashboard_base_url.trim_end_matches('/').to_owned();
        self.mcp_base_url = self.mcp_base_url.trim_end_matches('/').to_owned();
        Ok(())
    }
}

/// Process settings for running the app.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RunSettings {
    /// Command (argv) that starts the app.
    #[serde(default)]
    pub command: Vec<String>,
    /// Experiment names enabled for every run of the app.
    #[serde(default)]
    pub experiments: Vec<String>,
}

/// An API endpoint declared by the app, used for first-run guidance.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EndpointConfig {
    /// HTTP method.
    #[serde(default = "default_method")]
    pub method: String,
    /// Request path beginning with `/`.
    pub path: String,
}

fn default_method() -> String {
    "GET".into()
}

/// Per-application configuration read from [`APP_CONFIG_FILENAME`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    /// Browser preference used when a request asks for `auto`.
    #[serde(default)]
    pub browser: BrowserMode,
    /// Process settings.
    #[serde(default)]
    pub run: RunSettings,
    /// Declared endpoints.
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl AppConfig {
    /// Load the configuration for the app rooted at `app_root`.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file exists but cannot be read or
    /// parsed.
    pub fn load_for_app(app_root: &Path) -> Result<Self> {
        let path = app_root.join(APP_CONFIG_FILENAME);
        match fs::read_to_string(&path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(AppError::Config(format!(
                "failed to read {}: {err}",
                path.display()
            ))),
        }
    }

    /// Parse per-app configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        if let Some(bad) = config.endpoints.iter().find(|ep| !ep.path.starts_with('/')) {
            return Err(AppError::Config(format!(
                "endpoint path must start with '/': {}",
                bad.path
            )));
        }
        Ok(config)
    }
}
