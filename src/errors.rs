//! Error types shared across the daemon.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Daemon or per-application configuration could not be loaded.
    Config(String),
    /// The session tracing context could not be created.
    Tracing(String),
    /// The run listener could not be bound.
    PortBind(String),
    /// The application root could not be resolved to a tracked app.
    AppResolution(String),
    /// The requested or active namespace could not be resolved.
    Namespace(String),
    /// The run manager failed to start the application.
    RunStart(RunStartError),
    /// A mandatory upgrade halted the daemon.
    ForcedUpgrade(String),
    /// Stream registry invariant violation.
    Registry(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// IPC communication failure.
    Ipc(String),
    /// Secrets could not be loaded.
    Secrets(String),
    /// Update check or upgrade failure.
    Update(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Tracing(msg) => write!(f, "tracing: {msg}"),
            Self::PortBind(msg) => write!(f, "bind: {msg}"),
            Self::AppResolution(msg) => write!(f, "app: {msg}"),
            Self::Namespace(msg) => write!(f, "namespace: {msg}"),
            Self::RunStart(err) => write!(f, "{err}"),
            Self::ForcedUpgrade(msg) => write!(f, "forced upgrade: {msg}"),
            Self::Registry(msg) => write!(f, "registry: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Secrets(msg) => write!(f, "secrets: {msg}"),
            Self::Update(msg) => write!(f, "update: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<RunStartError> for AppError {
    fn from(err: RunStartError) -> Self {
        Self::RunStart(err)
    }
}

/// A single diagnostic produced while starting a run (e.g. a compile error).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Human-readable description.
    pub message: String,
    /// Source file the diagnostic points at, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// 1-based line number within `file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}: {}", self.message),
            (Some(file), None) => write!(f, "{file}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Structured list of diagnostics, sent to the client verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorList {
    /// Diagnostics in the order they were reported.
    pub errors: Vec<Diagnostic>,
}

impl ErrorList {
    /// Whether the list holds no diagnostics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Failure reported by the run manager when a run cannot start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStartError {
    /// Single error rendered as plain text.
    Message(String),
    /// Structured multi-error list rendered as a list on the client.
    List(ErrorList),
}

impl Display for RunStartError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(msg) => f.write_str(msg),
            Self::List(list) => {
                let lines: Vec<String> = list.errors.iter().map(ToString::to_string).collect();
                f.write_str(&lines.join("\n"))
            }
        }
    }
}
