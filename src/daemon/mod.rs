//! Run session orchestration.
//!
//! [`DaemonState`] bundles the daemon-wide collaborators every session
//! shares; [`coordinator::RunCoordinator`] drives one session through its
//! lifecycle using them.

pub mod announce;
pub mod coordinator;
pub mod first_run;
pub mod ports;
pub mod tracer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::manager::RunManager;
use crate::resolver::AppResolver;
use crate::secrets::SecretsStore;
use crate::stream::StreamRegistry;
use crate::update::VersionChecker;

pub use coordinator::{RunCoordinator, RunOutcome};

/// Shared daemon state handed to every session.
pub struct DaemonState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Active run output sinks.
    pub registry: Arc<StreamRegistry>,
    /// App and namespace resolution.
    pub apps: Arc<dyn AppResolver>,
    /// Secrets source.
    pub secrets: Arc<dyn SecretsStore>,
    /// Daemon-wide update-check result and upgrade mechanism.
    pub updates: Arc<dyn VersionChecker>,
    /// Starts the actual app.
    pub manager: Arc<dyn RunManager>,
    shutdown: CancellationToken,
    forced: AtomicBool,
}

impl DaemonState {
    /// Assemble the daemon state.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        registry: Arc<StreamRegistry>,
        apps: Arc<dyn AppResolver>,
        secrets: Arc<dyn SecretsStore>,
        updates: Arc<dyn VersionChecker>,
        manager: Arc<dyn RunManager>,
    ) -> Self {
        Self {
            config,
            registry,
            apps,
            secrets,
            updates,
            manager,
            shutdown: CancellationToken::new(),
            forced: AtomicBool::new(false),
        }
    }

    /// Token cancelled when the daemon should stop.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Ask the daemon supervisor to stop.
    ///
    /// `forced` marks a shutdown caused by a forced upgrade; the daemon
    /// then exits with a failure status.
    pub fn request_shutdown(&self, forced: bool) {
        if forced {
            warn!("daemon shutdown requested by forced upgrade");
            self.forced.store(true, Ordering::SeqCst);
        } else {
            info!("daemon shutdown requested");
        }
        self.shutdown.cancel();
    }

    /// Whether a forced upgrade requested the shutdown.
    #[must_use]
    pub fn is_forced_shutdown(&self) -> bool {
        self.forced.load(Ordering::SeqCst)
    }
}
