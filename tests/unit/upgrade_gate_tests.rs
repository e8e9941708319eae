//! Unit tests for the forced-upgrade `UpgradeGate`.

use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use localrun::models::update::VersionUpdate;
use localrun::stream::{CommandMessage, StreamLog, StreamWriter};
use localrun::update::{GateDecision, UpgradeGate, VersionChecker};
use localrun::{AppError, Result};
use tokio::sync::mpsc;

struct FakeChecker {
    fail: bool,
    upgrades: AtomicUsize,
}

impl FakeChecker {
    fn new(fail: bool) -> Self {
        Self {
            fail,
            upgrades: AtomicUsize::new(0),
        }
    }
}

impl VersionChecker for FakeChecker {
    fn available_update(&self) -> Option<VersionUpdate> {
        None
    }

    fn do_upgrade<'a>(
        &'a self,
        _update: &'a VersionUpdate,
        mut out: StreamWriter,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.upgrades.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::Update("mirror unreachable".into()));
            }
            let _ = writeln!(out, "installed");
            Ok(())
        })
    }
}

fn update(force: bool) -> VersionUpdate {
    VersionUpdate {
        version: "9.9.9".into(),
        force_upgrade: force,
        security_update: true,
        security_notes: Some("Fixes CVE-2026-0001".into()),
    }
}

fn collect(rx: &mut mpsc::UnboundedReceiver<CommandMessage>) -> (String, Vec<i32>) {
    let mut text = String::new();
    let mut exits = Vec::new();
    while let Ok(message) = rx.try_recv() {
        match message {
            CommandMessage::Output { data, .. } => text.push_str(&data),
            CommandMessage::Exit { code } => exits.push(code),
            CommandMessage::Errors { .. } => {}
        }
    }
    (text, exits)
}

#[tokio::test]
async fn absent_update_proceeds() {
    let checker = FakeChecker::new(false);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let log = StreamLog::new(tx, true);

    let decision = UpgradeGate::new(&checker).check(None, &log).await;

    assert_eq!(decision, GateDecision::Proceed);
    log.flush_buffers();
    assert_eq!(collect(&mut rx), (String::new(), Vec::new()));
    assert_eq!(checker.upgrades.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn optional_update_proceeds() {
    let checker = FakeChecker::new(false);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let log = StreamLog::new(tx, true);

    let decision = UpgradeGate::new(&checker)
        .check(Some(&update(false)), &log)
        .await;

    assert_eq!(decision, GateDecision::Proceed);
    assert!(!log.has_exited());
    log.flush_buffers();
    assert!(collect(&mut rx).1.is_empty());
    assert_eq!(checker.upgrades.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn forced_update_upgrades_and_exits_once() {
    let checker = FakeChecker::new(false);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let log = StreamLog::new(tx, true);

    let decision = UpgradeGate::new(&checker)
        .check(Some(&update(true)), &log)
        .await;

    assert_eq!(decision, GateDecision::HaltDaemon);
    assert_eq!(checker.upgrades.load(Ordering::SeqCst), 1);
    let (text, exits) = collect(&mut rx);
    assert_eq!(exits, vec![1]);
    assert!(text.contains("An urgent security update for localrun is available."));
    assert!(text.contains("Fixes CVE-2026-0001"));
    assert!(text.contains("Upgrading localrun to 9.9.9..."));
    assert!(text.contains("installed"));
}

#[tokio::test]
async fn failed_forced_upgrade_still_halts() {
    let checker = FakeChecker::new(true);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let log = StreamLog::new(tx, true);

    let decision = UpgradeGate::new(&checker)
        .check(Some(&update(true)), &log)
        .await;

    assert_eq!(decision, GateDecision::HaltDaemon);
    let (text, exits) = collect(&mut rx);
    assert_eq!(exits, vec![1]);
    assert!(text.contains("Upgrade failed: update: mirror unreachable"));
}
