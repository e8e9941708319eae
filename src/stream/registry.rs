//! Shared map from run id to output sink.
//!
//! One mutex guards both the map and the per-run bookkeeping stored next
//! to it, so a registration can never race with a scan of active runs.
//! Entries hold weak references: the registry never keeps a sink alive.
//!
//! Output routed to a run that is not registered yet is held under the
//! same mutex and replayed into the sink by [`StreamRegistry::register`],
//! so nothing printed during startup is lost or reordered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use tracing::debug;

use super::{OutputStream, StreamLog};
use crate::{AppError, Result};

/// Cap on output chunks held for a run that is not registered yet.
pub const MAX_PENDING_CHUNKS: usize = 1000;

struct Entry {
    sink: Weak<StreamLog>,
    listen_addr: String,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    pending: HashMap<String, Vec<(OutputStream, String)>>,
}

/// Summary of a registered run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActiveRun {
    /// Run identifier.
    pub id: String,
    /// Display listen address of the run.
    pub listen_addr: String,
}

/// Concurrent registry of run output sinks.
#[derive(Default)]
pub struct StreamRegistry {
    inner: Mutex<Inner>,
}

impl StreamRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink` for run `id`, recording its display address in the
    /// same critical section. Output held for `id` is written to `sink`
    /// before the lock is released.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if `id` is already registered.
    pub fn register(&self, id: &str, sink: &Arc<StreamLog>, listen_addr: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.entries.contains_key(id) {
            return Err(AppError::Registry(format!("run {id} is already registered")));
        }
        inner.entries.insert(
            id.to_owned(),
            Entry {
                sink: Arc::downgrade(sink),
                listen_addr: listen_addr.to_owned(),
            },
        );
        let held = inner.pending.remove(id).unwrap_or_default();
        debug!(run_id = id, replayed = held.len(), "run stream registered");
        for (stream, text) in held {
            sink.write_output(stream, &text);
        }
        Ok(())
    }

    /// Remove run `id` along with any output still held for it. Returns
    /// whether an entry was present.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.lock();
        inner.pending.remove(id);
        let removed = inner.entries.remove(id).is_some();
        drop(inner);
        if removed {
            debug!(run_id = id, "run stream removed");
        }
        removed
    }

    /// Deliver output for run `id`, holding it until the run is registered.
    ///
    /// Once [`MAX_PENDING_CHUNKS`] chunks are held, further output is
    /// dropped until registration.
    pub fn route(&self, id: &str, stream: OutputStream, text: String) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get(id) {
            if let Some(sink) = entry.sink.upgrade() {
                sink.write_output(stream, &text);
            }
            return;
        }
        let held = inner.pending.entry(id.to_owned()).or_default();
        if held.len() < MAX_PENDING_CHUNKS {
            held.push((stream, text));
        }
    }

    /// Drop output held for a run that will never be registered.
    pub fn discard_pending(&self, id: &str) {
        if let Some(held) = self.lock().pending.remove(id) {
            debug!(run_id = id, chunks = held.len(), "discarding output of unregistered run");
        }
    }

    /// Number of output chunks held for run `id`.
    #[must_use]
    pub fn pending_len(&self, id: &str) -> usize {
        self.lock().pending.get(id).map_or(0, Vec::len)
    }

    /// Find the live sink for run `id`.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<Arc<StreamLog>> {
        self.lock()
            .entries
            .get(id)
            .and_then(|entry| entry.sink.upgrade())
    }

    /// Snapshot of registered runs, sorted by id.
    #[must_use]
    pub fn active(&self) -> Vec<ActiveRun> {
        let inner = self.lock();
        let mut runs: Vec<ActiveRun> = inner
            .entries
            .iter()
            .map(|(id, entry)| ActiveRun {
                id: id.clone(),
                listen_addr: entry.listen_addr.clone(),
            })
            .collect();
        runs.sort_by(|a, b| a.id.cmp(&b.id));
        runs
    }

    /// Number of registered runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether no runs are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
