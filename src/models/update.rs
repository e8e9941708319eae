//! Available daemon updates.

use serde::{Deserialize, Serialize};

/// A newer daemon release reported by the update service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionUpdate {
    /// Target version string.
    pub version: String,
    /// The upgrade is mandatory and must happen before any run starts.
    #[serde(default)]
    pub force_upgrade: bool,
    /// The release contains security fixes.
    #[serde(default)]
    pub security_update: bool,
    /// Optional notes describing the security fixes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_notes: Option<String>,
}

impl VersionUpdate {
    /// Security notes, ignoring blank text.
    #[must_use]
    pub fn notes(&self) -> Option<&str> {
        self.security_notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
    }
}
