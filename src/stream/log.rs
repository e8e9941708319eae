//! Per-session output sink.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use super::{CommandMessage, OutputStream};
use crate::errors::ErrorList;

/// Output sink for one run session.
///
/// Starts optionally buffered so that early output does not interleave
/// with the startup announcement; [`flush_buffers`](Self::flush_buffers)
/// releases the buffer and switches to pass-through. At most one exit
/// message is ever sent, and nothing is sent after it.
pub struct StreamLog {
    tx: mpsc::UnboundedSender<CommandMessage>,
    buffer: Mutex<Option<Vec<(OutputStream, String)>>>,
    exited: AtomicBool,
}

impl StreamLog {
    /// Create a sink forwarding messages into `tx`.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<CommandMessage>, buffered: bool) -> Arc<Self> {
        Arc::new(Self {
            tx,
            buffer: Mutex::new(buffered.then(Vec::new)),
            exited: AtomicBool::new(false),
        })
    }

    /// Writer bound to the client's stdout.
    #[must_use]
    pub fn stdout(self: &Arc<Self>) -> StreamWriter {
        StreamWriter {
            log: Arc::clone(self),
            stream: OutputStream::Stdout,
        }
    }

    /// Writer bound to the client's stderr.
    #[must_use]
    pub fn stderr(self: &Arc<Self>) -> StreamWriter {
        StreamWriter {
            log: Arc::clone(self),
            stream: OutputStream::Stderr,
        }
    }

    /// Send output text, buffering it while the sink is buffered.
    ///
    /// Every send happens under the buffer lock, after re-checking the
    /// exit flag, so no output can follow the exit message.
    pub fn write_output(&self, stream: OutputStream, data: &str) {
        if data.is_empty() {
            return;
        }

        let mut buffer = self.lock_buffer();
        if self.has_exited() {
            return;
        }
        if let Some(pending) = buffer.as_mut() {
            match pending.last_mut() {
                Some((last, text)) if *last == stream => text.push_str(data),
                _ => pending.push((stream, data.to_owned())),
            }
            return;
        }

        self.send(CommandMessage::Output {
            stream,
            data: data.to_owned(),
        });
    }

    /// Send any buffered output and switch to pass-through mode.
    pub fn flush_buffers(&self) {
        let mut buffer = self.lock_buffer();
        self.flush_locked(&mut buffer);
    }

    /// Send a structured error list.
    pub fn send_errors(&self, errors: ErrorList) {
        let mut buffer = self.lock_buffer();
        if self.has_exited() {
            return;
        }
        self.flush_locked(&mut buffer);
        self.send(CommandMessage::Errors { errors });
    }

    /// Send the terminal exit code.
    ///
    /// Returns `false` if an exit code was already sent, in which case
    /// nothing is sent.
    pub fn send_exit(&self, code: i32) -> bool {
        let mut buffer = self.lock_buffer();
        if self.exited.swap(true, Ordering::SeqCst) {
            debug!(code, "exit already sent, ignoring");
            return false;
        }
        self.flush_locked(&mut buffer);
        self.send(CommandMessage::Exit { code });
        true
    }

    /// Whether the exit code has been sent.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    fn lock_buffer(&self) -> MutexGuard<'_, Option<Vec<(OutputStream, String)>>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush_locked(&self, buffer: &mut Option<Vec<(OutputStream, String)>>) {
        for (stream, data) in buffer.take().unwrap_or_default() {
            self.send(CommandMessage::Output { stream, data });
        }
    }

    fn send(&self, message: CommandMessage) {
        if self.tx.send(message).is_err() {
            debug!("stream receiver dropped, discarding message");
        }
    }
}

/// `std::io::Write` adapter targeting one stream of a [`StreamLog`].
#[derive(Clone)]
pub struct StreamWriter {
    log: Arc<StreamLog>,
    stream: OutputStream,
}

impl StreamWriter {
    /// The sink this writer feeds.
    #[must_use]
    pub fn log(&self) -> &Arc<StreamLog> {
        &self.log
    }
}

impl Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log
            .write_output(self.stream, &String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
