#![forbid(unsafe_code)]

//! `localrun`: local development run daemon.
//!
//! The daemon accepts run requests over local IPC, binds the app's
//! listener, starts the app through a [`manager::RunManager`] and streams
//! its output back to the requesting client.

pub mod config;
pub mod daemon;
pub mod errors;
pub mod ipc;
pub mod manager;
pub mod models;
pub mod persistence;
pub mod resolver;
pub mod secrets;
pub mod stream;
pub mod update;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
