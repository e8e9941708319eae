//! Startup announcement shown once a run is up.

use std::collections::HashMap;
use std::fmt::Write;

use crate::manager::{ProcGroupInfo, PRIMARY_GATEWAY};
use crate::models::app::Namespace;
use crate::models::run::DebugMode;
use crate::models::update::VersionUpdate;
use crate::update::CURRENT_VERSION;

/// Everything shown in the startup announcement.
pub struct Announcement<'a> {
    /// Display listen address of the run.
    pub listen_addr: &'a str,
    /// Hosted id when linked, else local id.
    pub app_id: &'a str,
    /// Dashboard base URL, without trailing slash.
    pub dashboard_base_url: &'a str,
    /// MCP base URL, without trailing slash.
    pub mcp_base_url: &'a str,
    /// Namespace the run executes under.
    pub namespace: &'a Namespace,
    /// Display-safe external database connection strings.
    pub databases: &'a HashMap<String, String>,
    /// Requested debug mode.
    pub debug: DebugMode,
    /// Process metadata, if the group is running.
    pub proc_group: Option<&'a ProcGroupInfo>,
    /// Pending update, if any.
    pub update: Option<&'a VersionUpdate>,
}

impl Announcement<'_> {
    /// Render the announcement text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out);
        let _ = writeln!(out, "  localrun development server running!\n");
        let _ = writeln!(out, "  Your API is running at:     http://{}", self.listen_addr);
        let _ = writeln!(
            out,
            "  Development Dashboard URL:  {}/{}",
            self.dashboard_base_url, self.app_id
        );
        let _ = writeln!(
            out,
            "  MCP SSE URL:                {}/sse?appID={}",
            self.mcp_base_url, self.app_id
        );

        if self.namespace.is_notable() {
            let _ = writeln!(out, "  Namespace:                  {}", self.namespace.name);
            if !self.databases.is_empty() {
                let _ = writeln!(out, "  External databases:");
                for (name, conn) in self.databases {
                    let _ = writeln!(out, "     {name}: {conn}");
                }
            }
        }

        if self.debug == DebugMode::Enabled {
            if let Some(gw) = self
                .proc_group
                .and_then(|group| group.gateways.get(PRIMARY_GATEWAY))
            {
                let _ = writeln!(out, "  Process ID:                 {}", gw.pid);
            }
        }

        if let Some(group) = self.proc_group.filter(|group| !group.experiments.is_empty()) {
            let _ = writeln!(
                out,
                "  Enabled experiment(s):      {}",
                group.experiments.join(", ")
            );
        }

        if let Some(update) = self.update {
            if update.security_update {
                let _ = writeln!(
                    out,
                    "\n  New localrun release available with security updates: {} (you have {CURRENT_VERSION})\n  Update with: localrun upgrade",
                    update.version
                );
                if let Some(notes) = update.notes() {
                    let _ = writeln!(out, "\n  {notes}");
                }
            } else {
                let _ = writeln!(
                    out,
                    "\n  New localrun release available: {} (you have {CURRENT_VERSION})\n  Update with: localrun upgrade",
                    update.version
                );
            }
        }

        let _ = writeln!(out);
        out
    }
}
