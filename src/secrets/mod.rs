//! Application secrets as consumed by a run.
//!
//! How secrets are stored is the store's business; the daemon only loads
//! a [`SecretBundle`] per app and derives display-safe values from it.

pub mod file_store;
pub mod redact;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::models::app::App;
use crate::Result;

pub use file_store::FileSecretsStore;
pub use redact::{redact_databases, RedactedDatabases, SecretWarning};

/// Raw secret values keyed by secret name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretBundle {
    /// Secret values.
    pub values: HashMap<String, String>,
}

impl SecretBundle {
    /// Bundle holding `values`.
    #[must_use]
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

/// Loads secrets for an app.
pub trait SecretsStore: Send + Sync {
    /// Load all secrets visible to local runs of `app`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Secrets`](crate::AppError::Secrets) if the
    /// secrets cannot be read.
    fn load<'a>(
        &'a self,
        app: &'a App,
    ) -> Pin<Box<dyn Future<Output = Result<SecretBundle>> + Send + 'a>>;
}
