//! Mandatory upgrade gate run before a session starts its app.

use std::io::Write;
use std::sync::Arc;

use tracing::{error, warn};

use super::VersionChecker;
use crate::models::update::VersionUpdate;
use crate::stream::StreamLog;

/// Whether the session may continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// No forced upgrade pending.
    Proceed,
    /// A forced upgrade ran; the whole daemon must stop.
    HaltDaemon,
}

/// Blocks runs while a forced security upgrade is pending.
pub struct UpgradeGate<'a> {
    checker: &'a dyn VersionChecker,
}

impl<'a> UpgradeGate<'a> {
    /// Gate consulting `checker` for upgrades.
    #[must_use]
    pub fn new(checker: &'a dyn VersionChecker) -> Self {
        Self { checker }
    }

    /// Apply the gate for a session writing to `log`.
    ///
    /// On a forced upgrade this performs the upgrade, flushes `log`, sends
    /// exit code 1 and returns [`GateDecision::HaltDaemon`]. An upgrade
    /// failure is reported to the client but still halts.
    pub async fn check(
        &self,
        update: Option<&VersionUpdate>,
        log: &Arc<StreamLog>,
    ) -> GateDecision {
        let Some(update) = update.filter(|update| update.force_upgrade) else {
            return GateDecision::Proceed;
        };

        warn!(version = %update.version, "forced upgrade pending; halting daemon");
        let mut stderr = log.stderr();
        let _ = writeln!(stderr, "An urgent security update for localrun is available.");
        if let Some(notes) = update.notes() {
            let _ = writeln!(stderr, "{notes}");
        }
        let _ = writeln!(stderr, "Upgrading localrun to {}...", update.version);

        if let Err(err) = self.checker.do_upgrade(update, log.stderr()).await {
            error!(%err, "forced upgrade failed");
            let _ = writeln!(stderr, "Upgrade failed: {err}");
        }

        log.flush_buffers();
        log.send_exit(1);
        GateDecision::HaltDaemon
    }
}
