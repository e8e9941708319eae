//! Secrets kept in a JSON file under the app root.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::pin::Pin;

use tracing::debug;

use super::{SecretBundle, SecretsStore};
use crate::models::app::App;
use crate::{AppError, Result};

/// Location of the secrets file relative to the app root.
pub const SECRETS_FILE: &str = ".localrun/secrets.json";

/// Reads `.localrun/secrets.json`, a flat object of string values.
#[derive(Debug, Clone, Default)]
pub struct FileSecretsStore;

impl FileSecretsStore {
    /// Create a store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Path of the secrets file for `app`.
    #[must_use]
    pub fn path_for(app: &App) -> PathBuf {
        app.root.join(SECRETS_FILE)
    }

    async fn read(app: &App) -> Result<SecretBundle> {
        let path = Self::path_for(app);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no secrets file");
                return Ok(SecretBundle::default());
            }
            Err(err) => {
                return Err(AppError::Secrets(format!(
                    "failed to read {}: {err}",
                    path.display()
                )))
            }
        };
        let values: HashMap<String, String> = serde_json::from_str(&raw).map_err(|err| {
            AppError::Secrets(format!("invalid secrets file {}: {err}", path.display()))
        })?;
        Ok(SecretBundle::new(values))
    }
}

impl SecretsStore for FileSecretsStore {
    fn load<'a>(
        &'a self,
        app: &'a App,
    ) -> Pin<Box<dyn Future<Output = Result<SecretBundle>> + Send + 'a>> {
        Box::pin(Self::read(app))
    }
}
