//! Per-session tracing context.
//!
//! Every session runs inside a `run_session` span. When the client asks
//! for a trace file, lifecycle events are also appended to it as JSON
//! lines. The tracer is released exactly once, either through
//! [`SessionTracer::close`] or on drop.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tracing::{info_span, warn, Span};

use crate::{AppError, Result};

#[derive(Serialize)]
struct TraceEvent<'a> {
    ts: String,
    event: &'a str,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    fields: serde_json::Value,
}

/// Tracing context owned by one run session.
pub struct SessionTracer {
    span: Span,
    path: Option<PathBuf>,
    writer: Mutex<Option<BufWriter<fs::File>>>,
}

impl SessionTracer {
    /// Begin tracing a session for the app at `app_root`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Tracing` if the trace file cannot be created.
    pub fn begin(app_root: &Path, working_dir: &Path, trace_file: Option<&Path>) -> Result<Self> {
        let span = info_span!(
            "run_session",
            app_root = %app_root.display(),
            working_dir = %working_dir.display(),
        );

        let writer = match trace_file {
            Some(path) => Some(open_trace_file(path)?),
            None => None,
        };

        let tracer = Self {
            span,
            path: trace_file.map(Path::to_path_buf),
            writer: Mutex::new(writer),
        };
        tracer.record(
            "session.begin",
            serde_json::json!({
                "app_root": app_root.display().to_string(),
                "working_dir": working_dir.display().to_string(),
            }),
        );
        Ok(tracer)
    }

    /// The session span; session work should be instrumented with it.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Path of the trace file, if one was requested.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append an event to the trace file. Write failures are logged only.
    pub fn record(&self, event: &str, fields: serde_json::Value) {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(writer) = guard.as_mut() else {
            return;
        };
        if let Err(err) = write_event(writer, event, fields) {
            warn!(%err, event, "failed to write trace event");
        }
    }

    /// Release the tracer, writing the final event.
    pub fn close(self, outcome: &str) {
        self.finish(outcome);
    }

    fn finish(&self, outcome: &str) {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut writer) = guard.take() {
            let fields = serde_json::json!({ "outcome": outcome });
            if let Err(err) = write_event(&mut writer, "session.end", fields) {
                warn!(%err, "failed to write final trace event");
            }
        }
    }
}

impl Drop for SessionTracer {
    fn drop(&mut self) {
        self.finish("dropped");
    }
}

fn open_trace_file(path: &Path) -> Result<BufWriter<fs::File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            AppError::Tracing(format!(
                "failed to create trace directory {}: {err}",
                parent.display()
            ))
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| {
            AppError::Tracing(format!("failed to open trace file {}: {err}", path.display()))
        })?;
    Ok(BufWriter::new(file))
}

fn write_event(
    writer: &mut BufWriter<fs::File>,
    event: &str,
    fields: serde_json::Value,
) -> std::io::Result<()> {
    let entry = TraceEvent {
        ts: Utc::now().to_rfc3339(),
        event,
        fields,
    };
    let line = serde_json::to_string(&entry).map_err(std::io::Error::other)?;
    writeln!(writer, "{line}")?;
    writer.flush()
}
