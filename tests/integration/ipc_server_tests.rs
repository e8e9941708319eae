//! Integration tests for the IPC server.
//!
//! Validates:
//! - `list` replies with the version and the active runs
//! - unknown commands are rejected without closing the connection
//! - `run` streams session output and stops the run when the client leaves
//! - a forced upgrade during `run` asks the daemon to shut down
//! - `upgrade` with nothing pending reports the current version

use std::sync::Arc;
use std::time::Duration;

use interprocess::local_socket::tokio::{prelude::*, RecvHalf, SendHalf, Stream};
use interprocess::local_socket::GenericNamespaced;
use localrun::daemon::DaemonState;
use localrun::ipc::server::spawn_ipc_server;
use localrun::models::update::VersionUpdate;
use localrun::persistence::app_repo::AppRepo;
use localrun::persistence::db;
use localrun::stream::{CommandMessage, StreamRegistry};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;

use super::test_helpers::{
    forced_update, gateway_group, test_config, FakeRunManager, FakeSecrets, FakeVersionChecker,
    StartBehavior,
};

struct Server {
    state: Arc<DaemonState>,
    manager: Arc<FakeRunManager>,
    ipc_name: String,
    ct: CancellationToken,
    app_dir: tempfile::TempDir,
    _data_dir: tempfile::TempDir,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

async fn start_server(update: Option<VersionUpdate>) -> Server {
    let data_dir = tempfile::tempdir().expect("data dir");
    let app_dir = tempfile::tempdir().expect("app dir");
    let mut config = test_config(data_dir.path());
    config.ipc_name = format!("localrun-test-{}", uuid::Uuid::new_v4().simple());
    let ipc_name = config.ipc_name.clone();

    let manager = FakeRunManager::new(StartBehavior::Succeed(gateway_group(77)));
    let apps = AppRepo::new(Arc::new(db::connect_memory().await.expect("db")));
    let state = Arc::new(DaemonState::new(
        Arc::new(config),
        Arc::new(StreamRegistry::new()),
        Arc::new(apps),
        FakeSecrets::with(&[]),
        FakeVersionChecker::new(update),
        manager.clone(),
    ));

    let ct = CancellationToken::new();
    spawn_ipc_server(Arc::clone(&state), ct.clone()).expect("ipc server");
    Server {
        state,
        manager,
        ipc_name,
        ct,
        app_dir,
        _data_dir: data_dir,
    }
}

async fn connect(server: &Server) -> (Lines<BufReader<RecvHalf>>, SendHalf) {
    let name = server
        .ipc_name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .expect("socket name");
    let stream = Stream::connect(name).await.expect("connect");
    let (reader, writer) = stream.split();
    (BufReader::new(reader).lines(), writer)
}

async fn send(writer: &mut SendHalf, request: &serde_json::Value) {
    let mut line = serde_json::to_string(request).expect("serialize");
    line.push('\n');
    writer.write_all(line.as_bytes()).await.expect("write request");
}

async fn next_json(lines: &mut Lines<BufReader<RecvHalf>>) -> Option<serde_json::Value> {
    let line = tokio::time::timeout(Duration::from_secs(10), lines.next_line())
        .await
        .expect("reply in time")
        .expect("read reply")?;
    Some(serde_json::from_str(&line).expect("json reply"))
}

/// Read stream messages until the connection closes.
async fn read_stream(lines: &mut Lines<BufReader<RecvHalf>>) -> Vec<CommandMessage> {
    let mut messages = Vec::new();
    while let Some(value) = next_json(lines).await {
        messages.push(serde_json::from_value(value).expect("command message"));
    }
    messages
}

fn run_request(server: &Server) -> serde_json::Value {
    serde_json::json!({
        "command": "run",
        "run": {
            "app_root": server.app_dir.path(),
            "working_dir": server.app_dir.path(),
            "listen_addr": ":0",
            "browser": "never",
        },
    })
}

#[tokio::test]
async fn list_reports_version_and_no_runs() {
    let server = start_server(None).await;
    let (mut lines, mut writer) = connect(&server).await;

    send(&mut writer, &serde_json::json!({ "command": "list" })).await;
    let reply = next_json(&mut lines).await.expect("reply");

    assert_eq!(reply["ok"], true);
    assert_eq!(reply["data"]["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(reply["data"]["runs"], serde_json::json!([]));
}

#[tokio::test]
async fn unknown_command_is_rejected_and_connection_stays_open() {
    let server = start_server(None).await;
    let (mut lines, mut writer) = connect(&server).await;

    send(&mut writer, &serde_json::json!({ "command": "explode" })).await;
    let reply = next_json(&mut lines).await.expect("reply");
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["error"], "unknown command: explode");

    send(&mut writer, &serde_json::json!({ "command": "list" })).await;
    let reply = next_json(&mut lines).await.expect("second reply");
    assert_eq!(reply["ok"], true);
}

#[tokio::test]
async fn malformed_request_gets_error_reply() {
    let server = start_server(None).await;
    let (mut lines, mut writer) = connect(&server).await;

    writer.write_all(b"{not json}\n").await.expect("write");
    let reply = next_json(&mut lines).await.expect("reply");

    assert_eq!(reply["ok"], false);
    assert!(reply["error"]
        .as_str()
        .expect("error text")
        .starts_with("invalid json"));
}

#[tokio::test]
async fn run_streams_output_and_stops_when_client_leaves() {
    let server = start_server(None).await;
    let (mut lines, mut writer) = connect(&server).await;
    send(&mut writer, &run_request(&server)).await;

    let mut text = String::new();
    while !text.contains("Your API is running at:") {
        let value = next_json(&mut lines).await.expect("stream open");
        if let Ok(CommandMessage::Output { data, .. }) = serde_json::from_value(value) {
            text.push_str(&data);
        }
    }

    let (mut list_lines, mut list_writer) = connect(&server).await;
    send(&mut list_writer, &serde_json::json!({ "command": "list" })).await;
    let reply = next_json(&mut list_lines).await.expect("list reply");
    assert_eq!(reply["data"]["runs"].as_array().map(Vec::len), Some(1));

    drop(lines);
    drop(writer);

    tokio::time::timeout(Duration::from_secs(10), async {
        while !server.state.registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("run removed after disconnect");
    assert_eq!(server.manager.stopped(), 1);
}

#[tokio::test]
async fn forced_upgrade_requests_daemon_shutdown() {
    let server = start_server(Some(forced_update())).await;
    let (mut lines, mut writer) = connect(&server).await;
    send(&mut writer, &run_request(&server)).await;

    let messages = read_stream(&mut lines).await;

    assert_eq!(messages.last(), Some(&CommandMessage::Exit { code: 1 }));
    tokio::time::timeout(Duration::from_secs(5), server.state.shutdown_token().cancelled())
        .await
        .expect("shutdown requested");
    assert!(server.state.is_forced_shutdown());
    assert_eq!(server.manager.starts(), 0);
}

#[tokio::test]
async fn upgrade_without_update_reports_up_to_date() {
    let server = start_server(None).await;
    let (mut lines, mut writer) = connect(&server).await;
    send(&mut writer, &serde_json::json!({ "command": "upgrade" })).await;

    let messages = read_stream(&mut lines).await;

    let text: String = messages
        .iter()
        .filter_map(|m| match m {
            CommandMessage::Output { data, .. } => Some(data.as_str()),
            _ => None,
        })
        .collect();
    assert!(text.contains("is up to date"), "{text}");
    assert_eq!(messages.last(), Some(&CommandMessage::Exit { code: 0 }));
}
