//! Tracked applications and their namespaces.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the namespace every app starts with.
pub const DEFAULT_NAMESPACE: &str = "default";

/// An application root tracked by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    /// Local identifier derived from the canonical root path.
    pub local_id: String,
    /// Canonical application root.
    pub root: PathBuf,
    /// Identifier of the linked hosted app, if the app has been linked.
    pub platform_id: Option<String>,
    /// When the app was first tracked.
    pub created_at: DateTime<Utc>,
}

impl App {
    /// The hosted identifier when linked, otherwise the local one.
    #[must_use]
    pub fn platform_or_local_id(&self) -> &str {
        self.platform_id.as_deref().unwrap_or(&self.local_id)
    }
}

/// An isolated environment identity (databases, caches) for an app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Namespace {
    /// Unique record identifier.
    pub id: String,
    /// Owning app's local identifier.
    pub app_id: String,
    /// Namespace name, unique per app.
    pub name: String,
    /// Whether this is the app's active namespace.
    pub active: bool,
}

impl Namespace {
    /// Whether the namespace is worth mentioning when a run starts.
    ///
    /// The active `default` namespace is the unremarkable case.
    #[must_use]
    pub fn is_notable(&self) -> bool {
        !self.active || self.name != DEFAULT_NAMESPACE
    }
}
