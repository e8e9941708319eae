//! Domain model module declarations.

pub mod app;
pub mod run;
pub mod update;
