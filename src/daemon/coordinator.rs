//! Drives one run session from request to termination.
//!
//! Every stage up to and including the app start may fail; a failure is
//! reported to the client, followed by a single exit code 1, and the
//! session ends without affecting the daemon. The only exception is a
//! forced upgrade, which ends in [`RunOutcome::ShutdownDaemon`].
//!
//! A session that starts successfully sends no exit message; the stream
//! simply ends when the run completes.

use std::io::Write;
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use super::announce::Announcement;
use super::first_run::FirstRunWatcher;
use super::ports::PortBinder;
use super::tracer::SessionTracer;
use super::DaemonState;
use crate::config::AppConfig;
use crate::errors::RunStartError;
use crate::manager::{OpTracker, RunSession, StartParams};
use crate::models::run::RunRequest;
use crate::secrets::{redact_databases, SecretBundle};
use crate::stream::StreamLog;
use crate::update::{GateDecision, UpgradeGate};
use crate::AppError;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run started and later completed.
    Completed,
    /// A stage failed; exit code 1 was sent.
    Failed,
    /// The client went away.
    Cancelled,
    /// A forced upgrade ran; the daemon must shut down.
    ShutdownDaemon,
}

impl RunOutcome {
    /// Stable name used in trace events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::ShutdownDaemon => "shutdown_daemon",
        }
    }
}

/// Runs sessions against the shared daemon state.
pub struct RunCoordinator {
    state: Arc<DaemonState>,
    binder: PortBinder,
}

impl RunCoordinator {
    /// Coordinator over `state`.
    #[must_use]
    pub fn new(state: Arc<DaemonState>) -> Self {
        Self {
            state,
            binder: PortBinder::default(),
        }
    }

    /// Run one session, writing everything the client sees to `log`.
    ///
    /// `cancel` fires when the client disconnects.
    pub async fn run(
        &self,
        req: &RunRequest,
        log: &Arc<StreamLog>,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let config = match AppConfig::load_for_app(&req.app_root) {
            Ok(config) => Arc::new(config),
            Err(err) => return fail(log, &format!("failed to load config: {err}")),
        };

        let tracer = match SessionTracer::begin(
            &req.app_root,
            &req.working_dir,
            req.trace_file.as_deref(),
        ) {
            Ok(tracer) => tracer,
            Err(err) => return fail(log, &format!("failed to begin tracing: {err}")),
        };

        let span = tracer.span().clone();
        let outcome = self
            .run_traced(req, log, cancel, &tracer, config)
            .instrument(span)
            .await;
        info!(outcome = outcome.as_str(), "run session ended");
        tracer.close(outcome.as_str());
        outcome
    }

    #[allow(clippy::too_many_lines)]
    async fn run_traced(
        &self,
        req: &RunRequest,
        log: &Arc<StreamLog>,
        cancel: &CancellationToken,
        tracer: &SessionTracer,
        config: Arc<AppConfig>,
    ) -> RunOutcome {
        let requested = req.effective_listen_addr();
        let bound = match self.binder.bind(requested).await {
            Ok(bound) => bound,
            Err(failure) => {
                warn!(requested, reason = %failure.reason, "failed to bind run listener");
                tracer.record("bind.failed", json!({ "addr": requested }));
                let mut stderr = log.stderr();
                for line in failure.render() {
                    let _ = writeln!(stderr, "{line}");
                }
                log.send_exit(1);
                return RunOutcome::Failed;
            }
        };
        tracer.record("bind.ok", json!({ "addr": bound.display_addr }));

        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }

        let app = match self.state.apps.track(&req.app_root).await {
            Ok(app) => app,
            Err(err) => return fail(log, &format!("failed to resolve app: {err}")),
        };
        let namespace = match self
            .state
            .apps
            .namespace_or_active(&app, req.namespace.as_deref())
            .await
        {
            Ok(ns) => ns,
            Err(err) => return fail(log, &format!("failed to resolve namespace: {err}")),
        };
        tracer.record(
            "app.resolved",
            json!({ "app_id": app.local_id, "namespace": namespace.name }),
        );

        let update = self.state.updates.available_update();
        let gate = UpgradeGate::new(self.state.updates.as_ref());
        if gate.check(update.as_ref(), log).await == GateDecision::HaltDaemon {
            tracer.record("upgrade.forced", json!({}));
            return RunOutcome::ShutdownDaemon;
        }

        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }

        let ops = Arc::new(OpTracker::new(log.stderr()));
        let params = StartParams {
            app: app.clone(),
            namespace,
            working_dir: req.working_dir.clone(),
            listener: bound.listener,
            listen_addr: bound.display_addr,
            watch: req.watch,
            environ: req.environ.clone(),
            ops: Arc::clone(&ops),
            browser: req.browser.resolve(config.browser),
            debug: req.debug_mode,
            config: Arc::clone(&config),
        };

        let started = tokio::select! {
            result = self.state.manager.start(cancel.clone(), params) => result,
            () = cancel.cancelled() => {
                ops.all_done();
                return RunOutcome::Cancelled;
            }
        };
        let session = match started {
            Ok(session) => session,
            Err(err) => {
                warn!(%err, "run failed to start");
                tracer.record("start.failed", json!({ "error": err.to_string() }));
                report_start_error(log, err);
                ops.all_done();
                log.send_exit(1);
                return RunOutcome::Failed;
            }
        };

        if let Err(err) = self
            .state
            .registry
            .register(session.id(), log, session.listen_addr())
        {
            error!(%err, run_id = session.id(), "failed to register run stream");
            ops.all_done();
            session.close();
            session.done().cancelled().await;
            self.state.registry.discard_pending(session.id());
            return fail(log, &format!("internal error: {err}"));
        }
        ops.all_done();
        info!(run_id = session.id(), listen_addr = session.listen_addr(), "run started");
        tracer.record(
            "run.started",
            json!({ "run_id": session.id(), "listen_addr": session.listen_addr() }),
        );

        let bundle = match self.state.secrets.load(&app).await {
            Ok(bundle) => bundle,
            Err(err) => {
                warn!(%err, "failed to load secrets");
                SecretBundle::default()
            }
        };
        let redacted = redact_databases(&bundle);

        let group = session.proc_group();
        let announcement = Announcement {
            listen_addr: session.listen_addr(),
            app_id: app.platform_or_local_id(),
            dashboard_base_url: &self.state.config.dashboard_base_url,
            mcp_base_url: &self.state.config.mcp_base_url,
            namespace: session.namespace(),
            databases: &redacted.databases,
            debug: req.debug_mode,
            proc_group: group.as_ref(),
            update: update.as_ref(),
        };
        let _ = log.stderr().write_all(announcement.render().as_bytes());
        log.flush_buffers();

        let watcher = FirstRunWatcher::new(self.state.config.first_run_delay())
            .spawn(Arc::clone(&session), log.stderr());

        let outcome = wait_completion(&session, cancel).await;

        if watcher.await.unwrap_or(false) {
            tracer.record("first_run.guidance", json!({}));
        }
        self.state.registry.remove(session.id());
        session.close();
        outcome
    }
}

async fn wait_completion(session: &RunSession, cancel: &CancellationToken) -> RunOutcome {
    tokio::select! {
        () = session.done().cancelled() => RunOutcome::Completed,
        () = cancel.cancelled() => {
            info!(run_id = session.id(), "client disconnected, stopping run");
            session.close();
            session.done().cancelled().await;
            RunOutcome::Cancelled
        }
    }
}

fn report_start_error(log: &Arc<StreamLog>, err: AppError) {
    match err {
        AppError::RunStart(RunStartError::List(list)) => log.send_errors(list),
        other => {
            let mut text = other.to_string();
            if !text.ends_with('\n') {
                text.push('\n');
            }
            let _ = log.stderr().write_all(text.as_bytes());
        }
    }
}

fn fail(log: &Arc<StreamLog>, message: &str) -> RunOutcome {
    warn!(message, "run session failed");
    let _ = writeln!(log.stderr(), "{message}");
    log.send_exit(1);
    RunOutcome::Failed
}
