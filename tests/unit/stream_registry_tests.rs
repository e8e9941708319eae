//! Unit tests for the shared `StreamRegistry`.

use std::sync::Arc;

use localrun::stream::{ActiveRun, CommandMessage, OutputStream, StreamLog, StreamRegistry};
use localrun::stream::registry::MAX_PENDING_CHUNKS;
use localrun::AppError;
use tokio::sync::mpsc;

fn sink() -> Arc<StreamLog> {
    let (tx, _rx) = mpsc::unbounded_channel();
    StreamLog::new(tx, false)
}

#[test]
fn register_lookup_remove() {
    let registry = StreamRegistry::new();
    let log = sink();

    registry.register("run-1", &log, "localhost:4000").unwrap();
    let found = registry.lookup("run-1").expect("registered");
    assert!(Arc::ptr_eq(&found, &log));
    assert_eq!(
        registry.active(),
        vec![ActiveRun {
            id: "run-1".into(),
            listen_addr: "localhost:4000".into(),
        }]
    );

    assert!(registry.remove("run-1"));
    assert!(registry.lookup("run-1").is_none());
    assert!(registry.is_empty());
}

#[test]
fn duplicate_registration_is_rejected() {
    let registry = StreamRegistry::new();
    let first = sink();
    let second = sink();

    registry.register("run-1", &first, "localhost:4000").unwrap();
    let err = registry
        .register("run-1", &second, "localhost:4001")
        .expect_err("duplicate");
    assert!(matches!(err, AppError::Registry(_)));

    let found = registry.lookup("run-1").unwrap();
    assert!(Arc::ptr_eq(&found, &first));
    assert_eq!(registry.len(), 1);
}

#[test]
fn remove_is_idempotent() {
    let registry = StreamRegistry::new();
    let log = sink();
    registry.register("run-1", &log, "localhost:4000").unwrap();

    assert!(registry.remove("run-1"));
    assert!(!registry.remove("run-1"));
    assert!(!registry.remove("never-registered"));
}

#[test]
fn registry_does_not_keep_sinks_alive() {
    let registry = StreamRegistry::new();
    let log = sink();
    registry.register("run-1", &log, "localhost:4000").unwrap();

    drop(log);
    assert!(registry.lookup("run-1").is_none());
}

#[test]
fn concurrent_sessions_only_see_their_own_entry() {
    let registry = Arc::new(StreamRegistry::new());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let id = format!("run-{i}");
                let log = sink();
                for _ in 0..100 {
                    registry
                        .register(&id, &log, &format!("localhost:{}", 4000 + i))
                        .unwrap();
                    let found = registry.lookup(&id).expect("own entry");
                    assert!(Arc::ptr_eq(&found, &log));
                    assert!(registry.remove(&id));
                    assert!(registry.lookup(&id).is_none());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(registry.is_empty());
}

fn texts(rx: &mut mpsc::UnboundedReceiver<CommandMessage>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let CommandMessage::Output { data, .. } = message {
            out.push(data);
        }
    }
    out
}

#[test]
fn output_before_registration_is_replayed_on_register() {
    let registry = StreamRegistry::new();
    registry.route("run-1", OutputStream::Stdout, "listening on :4000\n".into());
    registry.route("run-1", OutputStream::Stderr, "warming cache\n".into());
    assert_eq!(registry.pending_len("run-1"), 2);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let log = StreamLog::new(tx, false);
    registry.register("run-1", &log, "localhost:4000").unwrap();

    assert_eq!(registry.pending_len("run-1"), 0);
    assert_eq!(
        texts(&mut rx),
        vec!["listening on :4000\n".to_owned(), "warming cache\n".to_owned()]
    );

    registry.route("run-1", OutputStream::Stdout, "GET /health\n".into());
    assert_eq!(texts(&mut rx), vec!["GET /health\n".to_owned()]);
}

#[test]
fn held_output_is_capped() {
    let registry = StreamRegistry::new();
    for i in 0..MAX_PENDING_CHUNKS + 10 {
        registry.route("run-1", OutputStream::Stdout, format!("line {i}\n"));
    }
    assert_eq!(registry.pending_len("run-1"), MAX_PENDING_CHUNKS);
}

#[test]
fn discard_and_remove_drop_held_output() {
    let registry = StreamRegistry::new();
    registry.route("run-1", OutputStream::Stdout, "early\n".into());
    registry.discard_pending("run-1");
    assert_eq!(registry.pending_len("run-1"), 0);

    registry.route("run-2", OutputStream::Stdout, "early\n".into());
    assert!(!registry.remove("run-2"));
    assert_eq!(registry.pending_len("run-2"), 0);
}

#[test]
fn held_output_stays_with_its_run() {
    let registry = StreamRegistry::new();
    registry.route("run-1", OutputStream::Stdout, "one\n".into());
    registry.route("run-2", OutputStream::Stdout, "two\n".into());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let log = StreamLog::new(tx, false);
    registry.register("run-2", &log, "localhost:4001").unwrap();

    assert_eq!(texts(&mut rx), vec!["two\n".to_owned()]);
    assert_eq!(registry.pending_len("run-1"), 1);
}
