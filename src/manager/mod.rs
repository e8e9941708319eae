//! Run manager contract.
//!
//! The [`RunManager`] trait decouples the run orchestration from the way an
//! application is actually built and launched. The daemon ships
//! [`process::ProcessRunManager`], which runs the app's configured command;
//! tests inject their own implementations.

pub mod ops;
pub mod process;
mod watch;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::models::app::{App, Namespace};
use crate::models::run::{BrowserMode, DebugMode};
use crate::Result;

pub use ops::OpTracker;

/// Name of the gateway serving inbound API traffic.
pub const PRIMARY_GATEWAY: &str = "api-gateway";

/// Everything a run manager needs to start a run.
pub struct StartParams {
    /// The tracked app.
    pub app: App,
    /// Namespace the run executes under.
    pub namespace: Namespace,
    /// Directory the client was invoked from.
    pub working_dir: PathBuf,
    /// Bound listener, handed over by the coordinator.
    pub listener: TcpListener,
    /// Display listen address.
    pub listen_addr: String,
    /// Restart on source changes.
    pub watch: bool,
    /// `KEY=VALUE` environment overrides.
    pub environ: Vec<String>,
    /// Progress tracker for startup operations.
    pub ops: Arc<OpTracker>,
    /// Resolved browser mode.
    pub browser: BrowserMode,
    /// Debug mode.
    pub debug: DebugMode,
    /// Per-app configuration loaded for this session.
    pub config: Arc<AppConfig>,
}

/// A running process belonging to the run's process group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayProc {
    /// OS process id.
    pub pid: u32,
}

/// An API endpoint of the running app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointMeta {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
}

/// Metadata about the process group of a running app.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcGroupInfo {
    /// Gateways keyed by name.
    pub gateways: HashMap<String, GatewayProc>,
    /// Enabled experiment names.
    pub experiments: Vec<String>,
    /// Endpoints served by the app.
    pub endpoints: Vec<EndpointMeta>,
}

/// Handle to a started run.
///
/// Built by run managers. The completion token is cancelled exactly once,
/// when the run has ended.
pub struct RunSession {
    id: String,
    listen_addr: String,
    namespace: Namespace,
    done: CancellationToken,
    stop: CancellationToken,
    proc_group: Arc<RwLock<Option<ProcGroupInfo>>>,
}

impl RunSession {
    /// Assemble a session handle.
    #[must_use]
    pub fn new(
        id: String,
        listen_addr: String,
        namespace: Namespace,
        done: CancellationToken,
        stop: CancellationToken,
        proc_group: Arc<RwLock<Option<ProcGroupInfo>>>,
    ) -> Self {
        Self {
            id,
            listen_addr,
            namespace,
            done,
            stop,
            proc_group,
        }
    }

    /// Unique run identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolved display listen address.
    #[must_use]
    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    /// Namespace the run executes under.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Completion signal; cancelled when the run has ended.
    #[must_use]
    pub fn done(&self) -> &CancellationToken {
        &self.done
    }

    /// Snapshot of the current process group, if one is running.
    #[must_use]
    pub fn proc_group(&self) -> Option<ProcGroupInfo> {
        self.proc_group
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask the run to stop. Completion is still signalled through [`done`](Self::done).
    pub fn close(&self) {
        self.stop.cancel();
    }
}

/// Starts runs on behalf of the coordinator.
pub trait RunManager: Send + Sync {
    /// Start a run.
    ///
    /// `cancel` fires when the requesting client goes away; a run started
    /// under it must stop when it fires.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::RunStart`](crate::AppError::RunStart) when the app
    /// cannot be started.
    fn start(
        &self,
        cancel: CancellationToken,
        params: StartParams,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<RunSession>>> + Send + '_>>;
}
