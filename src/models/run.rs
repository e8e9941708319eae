//! Run request model and the run-mode enumerations it carries.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Listen address used when the client sends none.
pub const DEFAULT_LISTEN_ADDR: &str = ":4000";

/// When to open the app in a browser once it is running.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BrowserMode {
    /// Defer to the per-app configuration.
    #[default]
    Auto,
    /// Never open a browser.
    Never,
    /// Always open a browser.
    Always,
    /// Open a browser only when listening on a loopback address.
    LocalOnly,
}

impl BrowserMode {
    /// Resolve `Auto` against the app's configured preference.
    #[must_use]
    pub fn resolve(self, preference: BrowserMode) -> BrowserMode {
        match (self, preference) {
            (Self::Auto, Self::Auto) => Self::LocalOnly,
            (Self::Auto, configured) => configured,
            (explicit, _) => explicit,
        }
    }
}

/// Debugger attachment mode for the run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DebugMode {
    /// No debugging support.
    #[default]
    Disabled,
    /// Debugging enabled; the process id is announced.
    Enabled,
    /// Debugging enabled and the process waits for a debugger on start.
    Break,
}

impl DebugMode {
    /// Value exported to the app process through `LOCALRUN_DEBUG`.
    #[must_use]
    pub fn as_env_value(self) -> &'static str {
        match self {
            Self::Disabled => "",
            Self::Enabled => "enabled",
            Self::Break => "break",
        }
    }
}

/// Inbound request to start a local development run.
///
/// Immutable for the lifetime of the session it starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRequest {
    /// Application root directory.
    pub app_root: PathBuf,
    /// Directory the client was invoked from.
    pub working_dir: PathBuf,
    /// Requested listen address (`host:port`, host may be empty).
    #[serde(default)]
    pub listen_addr: String,
    /// Optional file receiving session trace events.
    #[serde(default)]
    pub trace_file: Option<PathBuf>,
    /// Restart the app when sources change.
    #[serde(default)]
    pub watch: bool,
    /// Environment overrides as ordered `KEY=VALUE` entries.
    #[serde(default)]
    pub environ: Vec<String>,
    /// Namespace override; the active namespace is used when absent.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Browser-open mode.
    #[serde(default)]
    pub browser: BrowserMode,
    /// Debug mode.
    #[serde(default)]
    pub debug_mode: DebugMode,
}

impl RunRequest {
    /// Minimal request for an app root, using defaults for everything else.
    #[must_use]
    pub fn new(app_root: impl Into<PathBuf>) -> Self {
        let app_root = app_root.into();
        Self {
            working_dir: app_root.clone(),
            app_root,
            listen_addr: String::new(),
            trace_file: None,
            watch: false,
            environ: Vec::new(),
            namespace: None,
            browser: BrowserMode::Auto,
            debug_mode: DebugMode::Disabled,
        }
    }

    /// Requested listen address, falling back to [`DEFAULT_LISTEN_ADDR`].
    #[must_use]
    pub fn effective_listen_addr(&self) -> &str {
        if self.listen_addr.trim().is_empty() {
            DEFAULT_LISTEN_ADDR
        } else {
            self.listen_addr.trim()
        }
    }

    /// Environment overrides split into key/value pairs.
    ///
    /// Entries without `=` are skipped.
    #[must_use]
    pub fn env_pairs(&self) -> Vec<(&str, &str)> {
        self.environ
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .filter(|(key, _)| !key.is_empty())
            .collect()
    }
}
