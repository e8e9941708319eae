//! Startup operation progress reporting.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use crate::stream::StreamWriter;

/// Identifier of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpState {
    Running,
    Done,
    Failed,
}

struct Inner {
    out: StreamWriter,
    ops: Vec<(String, OpState)>,
    finished: bool,
}

/// Reports startup operations to the client's stderr.
///
/// Silent once [`all_done`](Self::all_done) has been called.
pub struct OpTracker {
    inner: Mutex<Inner>,
}

impl OpTracker {
    /// Tracker writing to `out`.
    #[must_use]
    pub fn new(out: StreamWriter) -> Self {
        Self {
            inner: Mutex::new(Inner {
                out,
                ops: Vec::new(),
                finished: false,
            }),
        }
    }

    /// Start tracking an operation.
    pub fn add(&self, description: &str) -> OpId {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.ops.push((description.to_owned(), OpState::Running));
        if !inner.finished {
            let _ = writeln!(inner.out, "  {description}...");
        }
        OpId(inner.ops.len() - 1)
    }

    /// Mark an operation as completed.
    pub fn done(&self, id: OpId) {
        self.transition(id, OpState::Done, None);
    }

    /// Mark an operation as failed.
    pub fn fail(&self, id: OpId, err: &str) {
        self.transition(id, OpState::Failed, Some(err));
    }

    /// Stop reporting. Running operations are considered done.
    pub fn all_done(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.finished = true;
        for (_, state) in &mut inner.ops {
            if *state == OpState::Running {
                *state = OpState::Done;
            }
        }
    }

    /// Number of operations still running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ops
            .iter()
            .filter(|(_, state)| *state == OpState::Running)
            .count()
    }

    fn transition(&self, id: OpId, to: OpState, err: Option<&str>) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let inner = &mut *guard;
        let Some((description, state)) = inner.ops.get_mut(id.0) else {
            return;
        };
        if *state != OpState::Running {
            return;
        }
        *state = to;
        let line = match err {
            Some(err) => format!("  {description} failed: {err}"),
            None => format!("  {description} done"),
        };
        if !inner.finished {
            let _ = writeln!(inner.out, "{line}");
        }
    }
}
