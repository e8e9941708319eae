//! Source change detection for watch mode.

use std::path::{Component, Path};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{AppError, Result};

/// Quiet period collapsing a burst of file events into one restart.
const DEBOUNCE: Duration = Duration::from_millis(250);

/// Directory names whose contents never trigger a restart.
const IGNORED_DIRS: &[&str] = &[".git", ".localrun", "target", "node_modules"];

/// Watches an app root recursively and reports debounced changes.
pub(crate) struct SourceWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<()>,
}

impl SourceWatcher {
    /// Start watching `root`.
    pub(crate) fn start(root: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) if is_source_change(&event) => {
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "source watcher error"),
            },
        )
        .map_err(|err| AppError::Io(format!("failed to create source watcher: {err}")))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|err| AppError::Io(format!("failed to watch {}: {err}", root.display())))?;

        info!(root = %root.display(), "watching sources for changes");
        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next burst of changes. Returns `false` once the
    /// watcher has shut down.
    pub(crate) async fn changed(&mut self) -> bool {
        if self.rx.recv().await.is_none() {
            return false;
        }
        tokio::time::sleep(DEBOUNCE).await;
        while self.rx.try_recv().is_ok() {}
        true
    }
}

/// Wait for a change on an optional watcher; pends forever without one.
pub(crate) async fn next_change(watcher: &mut Option<SourceWatcher>) {
    if let Some(watcher) = watcher.as_mut() {
        if watcher.changed().await {
            return;
        }
    }
    std::future::pending::<()>().await;
}

fn is_source_change(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|path| !is_ignored(path))
}

fn is_ignored(path: &Path) -> bool {
    path.components().any(|component| match component {
        Component::Normal(name) => name
            .to_str()
            .is_some_and(|name| IGNORED_DIRS.contains(&name)),
        _ => false,
    })
}
