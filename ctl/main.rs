#![forbid(unsafe_code)]

//! `localrun`: command line client for `localrun-daemon`.
//!
//! Connects to the IPC socket and sends JSON commands to the daemon.
//! `run` streams the session's output until the daemon closes the stream.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

#[derive(Debug, Parser)]
#[command(
    name = "localrun",
    about = "Run apps locally through localrun-daemon",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the daemon's `ipc_name` config).
    #[arg(long, default_value = "localrun")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

/// Browser-open mode, mirrored from the daemon's run request.
#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum BrowserArg {
    Auto,
    Never,
    Always,
    LocalOnly,
}

impl BrowserArg {
    fn wire_name(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Never => "never",
            Self::Always => "always",
            Self::LocalOnly => "local-only",
        }
    }
}

/// Debug mode, mirrored from the daemon's run request.
#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum DebugArg {
    Disabled,
    Enabled,
    Break,
}

impl DebugArg {
    fn wire_name(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
            Self::Break => "break",
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the app in the current directory.
    Run {
        /// Port to listen on.
        #[arg(long, conflicts_with = "listen")]
        port: Option<u16>,

        /// Address to listen on (`host:port`).
        #[arg(long)]
        listen: Option<String>,

        /// Namespace to run under; defaults to the active one.
        #[arg(long)]
        namespace: Option<String>,

        /// Restart the app when sources change.
        #[arg(long)]
        watch: bool,

        /// When to open the app in a browser.
        #[arg(long, value_enum, default_value_t = BrowserArg::Auto)]
        browser: BrowserArg,

        /// Debugger mode.
        #[arg(long, value_enum, default_value_t = DebugArg::Disabled)]
        debug: DebugArg,

        /// Write session trace events to this file.
        #[arg(long)]
        trace: Option<PathBuf>,

        /// Environment override (`KEY=VALUE`), repeatable.
        #[arg(short = 'e', long = "env")]
        env: Vec<String>,

        /// Application root; defaults to the nearest directory holding
        /// `localrun.toml`, or the current directory.
        #[arg(long)]
        app_root: Option<PathBuf>,
    },

    /// List active runs.
    List,

    /// Install the pending release.
    Upgrade,
}

fn main() {
    let args = Cli::parse();

    let code = match args.command {
        Command::List => list(&args.ipc_name),
        Command::Upgrade => {
            stream_command(&args.ipc_name, &serde_json::json!({ "command": "upgrade" }))
        }
        Command::Run {
            port,
            listen,
            namespace,
            watch,
            browser,
            debug,
            trace,
            env,
            app_root,
        } => {
            let working_dir = match std::env::current_dir() {
                Ok(dir) => dir,
                Err(err) => {
                    eprintln!("Error: cannot determine working directory: {err}");
                    std::process::exit(1);
                }
            };
            let app_root = app_root.unwrap_or_else(|| find_app_root(&working_dir));
            let listen_addr = match (port, listen) {
                (Some(port), _) => format!(":{port}"),
                (None, Some(listen)) => listen,
                (None, None) => String::new(),
            };
            let request = serde_json::json!({
                "command": "run",
                "run": {
                    "app_root": absolute(&working_dir, &app_root),
                    "working_dir": working_dir,
                    "listen_addr": listen_addr,
                    "trace_file": trace.map(|path| absolute(&working_dir, &path)),
                    "watch": watch,
                    "environ": env,
                    "namespace": namespace,
                    "browser": browser.wire_name(),
                    "debug_mode": debug.wire_name(),
                },
            });
            stream_command(&args.ipc_name, &request)
        }
    };

    std::process::exit(code);
}

/// Nearest ancestor of `start` holding `localrun.toml`, else `start`.
fn find_app_root(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| dir.join("localrun.toml").is_file())
        .unwrap_or(start)
        .to_path_buf()
}

fn absolute(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn list(ipc_name: &str) -> i32 {
    match send_ipc_command(ipc_name, &serde_json::json!({ "command": "list" })) {
        Ok(response) => {
            let ok = response
                .get("ok")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            if !ok {
                let err_msg = response
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown error");
                eprintln!("Error: {err_msg}");
                return 1;
            }
            let runs = response
                .pointer("/data/runs")
                .and_then(serde_json::Value::as_array)
                .cloned()
                .unwrap_or_default();
            if runs.is_empty() {
                println!("No active runs.");
            }
            for run in runs {
                let id = run.get("id").and_then(|v| v.as_str()).unwrap_or("?");
                let addr = run
                    .get("listen_addr")
                    .and_then(|v| v.as_str())
                    .unwrap_or("?");
                println!("{id}  http://{addr}");
            }
            0
        }
        Err(err) => connect_failed(ipc_name, err.as_ref()),
    }
}

/// Send a streaming command and render messages until the stream ends.
///
/// Returns the daemon's exit code, or 0 when the stream ends without one.
fn stream_command(ipc_name: &str, request: &serde_json::Value) -> i32 {
    let stream = match open(ipc_name, request) {
        Ok(stream) => stream,
        Err(err) => return connect_failed(ipc_name, err.as_ref()),
    };

    let mut reader = BufReader::new(&stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => return 0,
            Ok(_) => {}
            Err(err) => {
                eprintln!("Error: lost connection to daemon: {err}");
                return 1;
            }
        }
        let Ok(message) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
            continue;
        };
        match message.get("type").and_then(|v| v.as_str()) {
            Some("output") => {
                let data = message.get("data").and_then(|v| v.as_str()).unwrap_or("");
                if message.get("stream").and_then(|v| v.as_str()) == Some("stdout") {
                    let mut out = std::io::stdout();
                    let _ = out.write_all(data.as_bytes());
                    let _ = out.flush();
                } else {
                    let mut err = std::io::stderr();
                    let _ = err.write_all(data.as_bytes());
                }
            }
            Some("errors") => render_errors(&message),
            Some("exit") => {
                let code = message
                    .get("code")
                    .and_then(serde_json::Value::as_i64)
                    .and_then(|code| i32::try_from(code).ok())
                    .unwrap_or(1);
                return code;
            }
            Some(_) | None => {
                // Single-reply error, e.g. a malformed request.
                if let Some(err_msg) = message.get("error").and_then(|v| v.as_str()) {
                    eprintln!("Error: {err_msg}");
                    return 1;
                }
            }
        }
    }
}

fn render_errors(message: &serde_json::Value) {
    let errors = message
        .pointer("/errors/errors")
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default();
    for error in errors {
        let text = error.get("message").and_then(|v| v.as_str()).unwrap_or("");
        let file = error.get("file").and_then(|v| v.as_str());
        let line = error.get("line").and_then(serde_json::Value::as_u64);
        match (file, line) {
            (Some(file), Some(line)) => eprintln!("  - {file}:{line}: {text}"),
            (Some(file), None) => eprintln!("  - {file}: {text}"),
            _ => eprintln!("  - {text}"),
        }
    }
}

fn connect_failed(ipc_name: &str, err: &dyn std::error::Error) -> i32 {
    eprintln!("Failed to connect to daemon: {err}");
    eprintln!("Is localrun-daemon running with ipc_name '{ipc_name}'?");
    1
}

/// Connect to the IPC socket and send a JSON command line.
fn open(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<Stream, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;
    Ok(stream)
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let stream = open(ipc_name, request)?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
