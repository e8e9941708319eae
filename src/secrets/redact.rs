//! Display-safe connection strings for external databases.
//!
//! Secrets named `sqldb::<name>` hold a JSON object with a
//! `connection_string` URL. For display, the password is removed and the
//! rest of the URL kept as is. Malformed entries are skipped with a
//! warning; they never fail a run.

use std::collections::HashMap;

use reqwest::Url;
use serde::Deserialize;
use tracing::warn;

use super::SecretBundle;

/// Key prefix marking external database secrets.
pub const SQLDB_PREFIX: &str = "sqldb::";

#[derive(Deserialize)]
struct ConnectionConfig {
    connection_string: String,
}

/// A secret that was skipped during redaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretWarning {
    /// The offending secret key.
    pub key: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Result of redacting a bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedactedDatabases {
    /// Database name to display-safe connection string.
    ///
    /// Iteration order is unspecified.
    pub databases: HashMap<String, String>,
    /// Entries that could not be parsed.
    pub warnings: Vec<SecretWarning>,
}

/// Collect display-safe connection strings for every `sqldb::` secret.
#[must_use]
pub fn redact_databases(bundle: &SecretBundle) -> RedactedDatabases {
    let mut out = RedactedDatabases::default();

    for (key, value) in &bundle.values {
        let Some(db) = key.strip_prefix(SQLDB_PREFIX) else {
            continue;
        };
        match parse_and_redact(value) {
            Ok(conn) => {
                out.databases.insert(db.to_owned(), conn);
            }
            Err(reason) => {
                warn!(key = %key, %reason, "skipping external database secret");
                out.warnings.push(SecretWarning {
                    key: key.clone(),
                    reason,
                });
            }
        }
    }
    out
}

fn parse_and_redact(value: &str) -> Result<String, String> {
    let config: ConnectionConfig = serde_json::from_str(value)
        .map_err(|err| format!("failed to unmarshal connection string: {err}"))?;
    redact_connection_string(&config.connection_string)
}

/// Remove the password from a connection URL, keeping the username.
///
/// # Errors
///
/// Returns a description if the string is not a URL that can carry
/// credentials.
pub fn redact_connection_string(raw: &str) -> Result<String, String> {
    let mut url =
        Url::parse(raw).map_err(|err| format!("failed to parse connection string: {err}"))?;
    if url.password().is_some() {
        url.set_password(None)
            .map_err(|()| "connection string cannot carry credentials".to_owned())?;
    }
    Ok(url.to_string())
}
