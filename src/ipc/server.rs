//! Local IPC server for `localrun` client commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands
//! from the `localrun` client and routes them to the appropriate handler.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "list"}
//! {"command": "run", "run": { "app_root": "/src/app", "working_dir": "/src/app" }}
//! {"command": "upgrade"}
//! ```
//!
//! `list` answers with a single response line:
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "unknown command: foo"}
//! ```
//!
//! `run` and `upgrade` answer with a stream of command messages, one per
//! line, and close the connection when done:
//! ```json
//! {"type": "output", "stream": "stderr", "data": "..."}
//! {"type": "errors", "errors": {"errors": [{"message": "..."}]}}
//! {"type": "exit", "code": 1}
//! ```
//! Closing the client side of a `run` connection stops the run.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use interprocess::local_socket::tokio::{RecvHalf, SendHalf};
use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::daemon::{DaemonState, RunCoordinator, RunOutcome};
use crate::models::run::RunRequest;
use crate::stream::{CommandMessage, StreamLog};
use crate::update::CURRENT_VERSION;
use crate::{AppError, Result};

/// Inbound IPC request from the `localrun` client.
#[derive(Debug, Deserialize)]
struct IpcRequest {
    /// Command verb.
    command: String,
    /// Run parameters (for `run`).
    run: Option<RunRequest>,
}

/// Outbound IPC response for single-reply commands.
#[derive(Debug, Serialize)]
struct IpcResponse {
    /// Whether the command succeeded.
    ok: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    state: Arc<DaemonState>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = state.config.ipc_name.clone();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let state = Arc::clone(&state);
                                tokio::spawn(handle_connection(stream, state));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single IPC client connection.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    state: Arc<DaemonState>,
) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let request = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => request,
                        Err(err) => {
                            let response = IpcResponse::error(format!("invalid json: {err}"));
                            if write_json(&mut writer, &response).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    };

                    match request.command.as_str() {
                        "run" => {
                            let Some(run) = request.run else {
                                let _ = write_json(
                                    &mut writer,
                                    &IpcResponse::error("run: missing 'run' parameters"),
                                )
                                .await;
                                break;
                            };
                            handle_run(run, &state, buf_reader, writer).await;
                            return;
                        }
                        "upgrade" => {
                            handle_upgrade(&state, writer).await;
                            return;
                        }
                        _ => {
                            let response = dispatch_command(&request, &state);
                            if let Err(err) = write_json(&mut writer, &response).await {
                                warn!(%err, "failed to write ipc response");
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        info!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Route a single-reply IPC command to its handler.
fn dispatch_command(request: &IpcRequest, state: &Arc<DaemonState>) -> IpcResponse {
    let span = info_span!("ipc_command", command = %request.command);
    let _guard = span.enter();

    match request.command.as_str() {
        "list" => {
            let runs = state.registry.active();
            info!(count = runs.len(), "listing active runs");
            IpcResponse::success(serde_json::json!({
                "version": CURRENT_VERSION,
                "runs": runs,
            }))
        }
        other => {
            warn!(command = other, "unknown IPC command");
            IpcResponse::error(format!("unknown command: {other}"))
        }
    }
}

/// Stream a run session to the client.
async fn handle_run(
    req: RunRequest,
    state: &Arc<DaemonState>,
    mut reader: BufReader<RecvHalf>,
    mut writer: SendHalf,
) {
    info!(app_root = %req.app_root.display(), "run requested");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let log = StreamLog::new(tx, true);
    let cancel = CancellationToken::new();

    // The client sends nothing after the request; EOF means it went away.
    let disconnect = cancel.clone();
    let eof_watch = tokio::spawn(async move {
        let mut buf = String::new();
        loop {
            buf.clear();
            match reader.read_line(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
        info!("run client disconnected");
        disconnect.cancel();
    });

    let coordinator = RunCoordinator::new(Arc::clone(state));
    let outcome = pump(
        coordinator.run(&req, &log, &cancel),
        &mut rx,
        &mut writer,
        &cancel,
    )
    .await;
    drop(log);
    drain(&mut rx, &mut writer).await;
    eof_watch.abort();

    if outcome == RunOutcome::ShutdownDaemon {
        state.request_shutdown(true);
    }
}

/// Run the pending upgrade, streaming its output.
async fn handle_upgrade(state: &Arc<DaemonState>, mut writer: SendHalf) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let log = StreamLog::new(tx, false);
    let cancel = CancellationToken::new();

    let upgrade = async {
        let Some(update) = state.updates.available_update() else {
            let _ = writeln!(log.stderr(), "localrun {CURRENT_VERSION} is up to date");
            log.send_exit(0);
            return;
        };
        let _ = writeln!(log.stderr(), "Upgrading localrun to {}...", update.version);
        match state.updates.do_upgrade(&update, log.stderr()).await {
            Ok(()) => {
                log.send_exit(0);
            }
            Err(err) => {
                error!(%err, "upgrade failed");
                let _ = writeln!(log.stderr(), "Upgrade failed: {err}");
                log.send_exit(1);
            }
        }
    };
    pump(upgrade, &mut rx, &mut writer, &cancel).await;
    drop(log);
    drain(&mut rx, &mut writer).await;
}

/// Drive `work` while forwarding messages to the client.
///
/// A failed write marks the client as gone and cancels `cancel`; later
/// messages are discarded.
async fn pump<F: Future>(
    work: F,
    rx: &mut mpsc::UnboundedReceiver<CommandMessage>,
    writer: &mut SendHalf,
    cancel: &CancellationToken,
) -> F::Output {
    tokio::pin!(work);
    let mut client_gone = false;
    loop {
        tokio::select! {
            output = &mut work => return output,
            Some(message) = rx.recv() => {
                if client_gone {
                    continue;
                }
                if let Err(err) = write_json(writer, &message).await {
                    warn!(%err, "failed to write to run client");
                    client_gone = true;
                    cancel.cancel();
                }
            }
        }
    }
}

/// Forward whatever is still queued.
async fn drain(rx: &mut mpsc::UnboundedReceiver<CommandMessage>, writer: &mut SendHalf) {
    while let Ok(message) = rx.try_recv() {
        if write_json(writer, &message).await.is_err() {
            break;
        }
    }
    let _ = writer.flush().await;
}

async fn write_json<T: Serialize>(writer: &mut SendHalf, value: &T) -> std::io::Result<()> {
    let mut line = serde_json::to_string(value).unwrap_or_else(|_| {
        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
    });
    line.push('\n');
    writer.write_all(line.as_bytes()).await
}
