//! Run manager that launches the app's configured command.
//!
//! The child gets the run's port through `PORT`/`LISTEN_ADDR`; the
//! coordinator's listener is released right before spawning so the child
//! can bind it. Output is routed to the client by run id through the
//! [`StreamRegistry`], holding early lines until the run is registered.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::watch::{next_change, SourceWatcher};
use super::{
    EndpointMeta, GatewayProc, ProcGroupInfo, RunManager, RunSession, StartParams, PRIMARY_GATEWAY,
};
use crate::config::{AppConfig, APP_CONFIG_FILENAME};
use crate::daemon::ports::ListenAddr;
use crate::errors::RunStartError;
use crate::models::run::{BrowserMode, DebugMode};
use crate::stream::{OutputStream, StreamRegistry};
use crate::{AppError, Result};

/// Launches apps as child processes.
pub struct ProcessRunManager {
    registry: Arc<StreamRegistry>,
    grace: Duration,
}

impl ProcessRunManager {
    /// Manager routing output through `registry` and allowing `grace`
    /// between SIGTERM and kill.
    #[must_use]
    pub fn new(registry: Arc<StreamRegistry>, grace: Duration) -> Self {
        Self { registry, grace }
    }

    #[allow(clippy::too_many_lines)]
    async fn start_process(
        &self,
        cancel: CancellationToken,
        params: StartParams,
    ) -> Result<Arc<RunSession>> {
        let StartParams {
            app,
            namespace,
            working_dir,
            listener,
            listen_addr,
            watch,
            environ,
            ops,
            browser,
            debug,
            config,
        } = params;

        let Some((program, args)) = config.run.command.split_first() else {
            return Err(RunStartError::Message(format!(
                "no run command configured; set [run] command in {APP_CONFIG_FILENAME}"
            ))
            .into());
        };

        let port = listener
            .local_addr()
            .map_err(|err| AppError::Io(format!("listener has no local address: {err}")))?
            .port();

        let mut env = vec![
            ("PORT".to_owned(), port.to_string()),
            ("LISTEN_ADDR".to_owned(), listen_addr.clone()),
            ("LOCALRUN_APP_ID".to_owned(), app.local_id.clone()),
            ("LOCALRUN_NAMESPACE".to_owned(), namespace.name.clone()),
            ("LOCALRUN_WORKING_DIR".to_owned(), working_dir.display().to_string()),
        ];
        if debug != DebugMode::Disabled {
            env.push(("LOCALRUN_DEBUG".to_owned(), debug.as_env_value().to_owned()));
        }
        if !config.run.experiments.is_empty() {
            env.push((
                "LOCALRUN_EXPERIMENTS".to_owned(),
                config.run.experiments.join(","),
            ));
        }
        env.extend(environ.iter().filter_map(|entry| {
            entry
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
        }));

        let launch = Launch {
            program: program.clone(),
            args: args.to_vec(),
            dir: app.root.clone(),
            env,
        };

        let op = ops.add("Starting application");
        drop(listener);
        let child = match launch.spawn() {
            Ok(child) => child,
            Err(err) => {
                ops.fail(op, &err.to_string());
                return Err(
                    RunStartError::Message(format!("failed to start {program}: {err}")).into(),
                );
            }
        };
        ops.done(op);

        let id = Uuid::new_v4().to_string();
        info!(run_id = %id, pid = child.id().unwrap_or(0), %program, "app process started");

        let watcher = if watch {
            match SourceWatcher::start(&app.root) {
                Ok(watcher) => Some(watcher),
                Err(err) => {
                    warn!(%err, "watch mode unavailable, continuing without it");
                    None
                }
            }
        } else {
            None
        };

        let proc_group = Arc::new(RwLock::new(Some(group_info(child.id(), &config))));
        let done = CancellationToken::new();
        let stop = CancellationToken::new();

        let supervisor = Supervisor {
            router: OutputRouter::new(Arc::clone(&self.registry), id.clone()),
            launch,
            grace: self.grace,
            config: Arc::clone(&config),
            proc_group: Arc::clone(&proc_group),
        };
        tokio::spawn(
            supervisor
                .run(child, watcher, stop.clone(), cancel, done.clone())
                .instrument(info_span!("app_supervisor", run_id = %id)),
        );

        if should_open_browser(browser, &listen_addr) {
            open_browser(format!("http://{listen_addr}"));
        }

        Ok(Arc::new(RunSession::new(
            id,
            listen_addr,
            namespace,
            done,
            stop,
            proc_group,
        )))
    }
}

impl RunManager for ProcessRunManager {
    fn start(
        &self,
        cancel: CancellationToken,
        params: StartParams,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<RunSession>>> + Send + '_>> {
        Box::pin(self.start_process(cancel, params))
    }
}

/// How to (re)launch the app process.
struct Launch {
    program: String,
    args: Vec<String>,
    dir: PathBuf,
    env: Vec<(String, String)>,
}

impl Launch {
    fn spawn(&self) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.dir)
            .envs(self.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Owns the app process for the lifetime of a run.
struct Supervisor {
    router: OutputRouter,
    launch: Launch,
    grace: Duration,
    config: Arc<AppConfig>,
    proc_group: Arc<RwLock<Option<ProcGroupInfo>>>,
}

impl Supervisor {
    async fn run(
        self,
        mut child: Child,
        mut watcher: Option<SourceWatcher>,
        stop: CancellationToken,
        cancel: CancellationToken,
        done: CancellationToken,
    ) {
        let mut pumps = self.attach_pumps(&mut child);

        'run: loop {
            tokio::select! {
                () = stop.cancelled() => {
                    terminate(&mut child, self.grace).await;
                    break 'run;
                }
                () = cancel.cancelled() => {
                    terminate(&mut child, self.grace).await;
                    break 'run;
                }
                status = child.wait() => {
                    let text = match status {
                        Ok(status) => format!("app process exited: {status}\n"),
                        Err(err) => format!("app process lost: {err}\n"),
                    };
                    info!(status = %text.trim_end(), "app process ended");
                    self.router.route(OutputStream::Stderr, text);
                    self.set_proc_group(None);

                    if watcher.is_none() {
                        break 'run;
                    }
                    self.router.route(
                        OutputStream::Stderr,
                        "waiting for source changes to restart\n".to_owned(),
                    );
                    tokio::select! {
                        () = stop.cancelled() => break 'run,
                        () = cancel.cancelled() => break 'run,
                        () = next_change(&mut watcher) => {}
                    }
                    match self.respawn(&mut child, &mut pumps).await {
                        Ok(()) => {}
                        Err(err) => {
                            self.router.route(OutputStream::Stderr, format!("{err}\n"));
                        }
                    }
                }
                () = next_change(&mut watcher) => {
                    self.router.route(
                        OutputStream::Stderr,
                        "changes detected, restarting app\n".to_owned(),
                    );
                    terminate(&mut child, self.grace).await;
                    if let Err(err) = self.respawn(&mut child, &mut pumps).await {
                        self.router.route(OutputStream::Stderr, format!("{err}\n"));
                    }
                }
            }
        }

        for pump in pumps {
            if tokio::time::timeout(self.grace, pump).await.is_err() {
                debug!("output pump did not finish in time");
            }
        }
        self.set_proc_group(None);
        // The coordinator never registers a run whose client is gone.
        if cancel.is_cancelled() {
            self.router.discard_pending();
        }
        done.cancel();
        info!("run finished");
    }

    async fn respawn(&self, child: &mut Child, pumps: &mut Vec<JoinHandle<()>>) -> Result<()> {
        for pump in pumps.drain(..) {
            let _ = tokio::time::timeout(self.grace, pump).await;
        }
        let mut fresh = self
            .launch
            .spawn()
            .map_err(|err| AppError::Io(format!("failed to restart {}: {err}", self.launch.program)))?;
        *pumps = self.attach_pumps(&mut fresh);
        self.set_proc_group(Some(group_info(fresh.id(), &self.config)));
        info!(pid = fresh.id().unwrap_or(0), "app process restarted");
        *child = fresh;
        Ok(())
    }

    fn attach_pumps(&self, child: &mut Child) -> Vec<JoinHandle<()>> {
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(spawn_pump(stdout, OutputStream::Stdout, self.router.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(spawn_pump(stderr, OutputStream::Stderr, self.router.clone()));
        }
        pumps
    }

    fn set_proc_group(&self, info: Option<ProcGroupInfo>) {
        *self
            .proc_group
            .write()
            .unwrap_or_else(PoisonError::into_inner) = info;
    }
}

/// Routes process output to the run's registered sink.
#[derive(Clone)]
struct OutputRouter {
    registry: Arc<StreamRegistry>,
    run_id: String,
}

impl OutputRouter {
    fn new(registry: Arc<StreamRegistry>, run_id: String) -> Self {
        Self { registry, run_id }
    }

    fn route(&self, stream: OutputStream, text: String) {
        self.registry.route(&self.run_id, stream, text);
    }

    fn discard_pending(&self) {
        self.registry.discard_pending(&self.run_id);
    }
}

fn spawn_pump<R>(reader: R, stream: OutputStream, router: OutputRouter) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(mut line)) => {
                    line.push('\n');
                    router.route(stream, line);
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(%err, "output pump read failed");
                    break;
                }
            }
        }
    })
}

fn group_info(pid: Option<u32>, config: &AppConfig) -> ProcGroupInfo {
    let mut info = ProcGroupInfo {
        experiments: config.run.experiments.clone(),
        endpoints: config
            .endpoints
            .iter()
            .map(|ep| EndpointMeta {
                method: ep.method.to_uppercase(),
                path: ep.path.clone(),
            })
            .collect(),
        ..ProcGroupInfo::default()
    };
    if let Some(pid) = pid {
        info.gateways
            .insert(PRIMARY_GATEWAY.to_owned(), GatewayProc { pid });
    }
    info
}

/// Stop a child: SIGTERM first where supported, kill after `grace`.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            if kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(grace, child.wait()).await.is_ok()
            {
                return;
            }
            warn!(pid, "app did not exit within grace period, forcing kill");
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(err) = child.kill().await {
        debug!(%err, "kill failed; process already gone");
    }
}

fn should_open_browser(mode: BrowserMode, listen_addr: &str) -> bool {
    match mode {
        BrowserMode::Always => true,
        BrowserMode::LocalOnly => ListenAddr::parse(listen_addr).is_ok_and(|addr| addr.is_local()),
        BrowserMode::Auto | BrowserMode::Never => false,
    }
}

fn open_browser(url: String) {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(windows) {
        "explorer"
    } else {
        "xdg-open"
    };
    tokio::spawn(async move {
        match Command::new(opener)
            .arg(&url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) if status.success() => debug!(%url, "browser opened"),
            Ok(status) => debug!(%url, %status, "browser opener failed"),
            Err(err) => debug!(%url, %err, "no browser opener available"),
        }
    });
}
