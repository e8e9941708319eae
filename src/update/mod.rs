//! Daemon release checks and mandatory upgrades.

pub mod checker;
pub mod gate;

use std::future::Future;
use std::pin::Pin;

use crate::models::update::VersionUpdate;
use crate::stream::StreamWriter;
use crate::Result;

pub use checker::HttpUpdateChecker;
pub use gate::{GateDecision, UpgradeGate};

/// Version of the running daemon.
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Source of the daemon-wide update-check result.
pub trait VersionChecker: Send + Sync {
    /// The most recently observed update, if any.
    fn available_update(&self) -> Option<VersionUpdate>;

    /// Install `update`, writing progress to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Update`](crate::AppError::Update) if the upgrade
    /// fails.
    fn do_upgrade<'a>(
        &'a self,
        update: &'a VersionUpdate,
        out: StreamWriter,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
