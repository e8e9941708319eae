//! Client-facing output streams.
//!
//! A run session talks to its client through a [`StreamLog`]: raw output
//! tagged by stream, structured error lists, and a single terminal exit
//! code. Sessions are found by run id through the shared
//! [`StreamRegistry`].

pub mod log;
pub mod registry;

use serde::{Deserialize, Serialize};

use crate::errors::ErrorList;

pub use log::{StreamLog, StreamWriter};
pub use registry::{ActiveRun, StreamRegistry};

/// Which client stream an output chunk belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// One message of the streaming output protocol.
///
/// Serialized as one JSON object per line, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandMessage {
    /// Raw output text.
    Output {
        /// Target stream.
        stream: OutputStream,
        /// Output text.
        data: String,
    },
    /// Structured error list to render as a list.
    Errors {
        /// The diagnostics.
        errors: ErrorList,
    },
    /// Terminal exit code; always the last message of a session.
    Exit {
        /// Process exit code for the client.
        code: i32,
    },
}
