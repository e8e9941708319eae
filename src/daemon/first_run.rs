//! First-run guidance for sessions that stay up.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::manager::{ProcGroupInfo, RunSession};
use crate::stream::StreamWriter;

/// Races a session's completion against a fixed delay.
#[derive(Debug, Clone, Copy)]
pub struct FirstRunWatcher {
    delay: Duration,
}

impl FirstRunWatcher {
    /// Watcher emitting guidance once `delay` has passed.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Spawn the watcher for `session`.
    ///
    /// The task resolves to `true` if guidance was written to `out`.
    pub fn spawn(self, session: Arc<RunSession>, mut out: StreamWriter) -> JoinHandle<bool> {
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = session.done().cancelled() => false,
                () = tokio::time::sleep(self.delay) => {
                    let Some(group) = session.proc_group() else {
                        debug!(run_id = session.id(), "no process group, skipping guidance");
                        return false;
                    };
                    let text = first_run_guidance(session.listen_addr(), &group);
                    let _ = out.write_all(text.as_bytes());
                    true
                }
            }
        })
    }
}

/// Guidance text for a run listening on `listen_addr`.
#[must_use]
pub fn first_run_guidance(listen_addr: &str, group: &ProcGroupInfo) -> String {
    match group.endpoints.first() {
        Some(endpoint) => {
            let method = if endpoint.method.eq_ignore_ascii_case("GET") {
                String::new()
            } else {
                format!("-X {} ", endpoint.method.to_ascii_uppercase())
            };
            format!(
                "  Hint: try calling your API with:\n\n    curl {method}http://{listen_addr}{}\n\n",
                endpoint.path
            )
        }
        None => format!(
            "  Hint: your app is up. Send requests to http://{listen_addr} or open the dashboard to explore it.\n\n"
        ),
    }
}
