//! Tracked app and namespace repository for `SQLite` persistence.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::models::app::{App, Namespace, DEFAULT_NAMESPACE};
use crate::resolver::AppResolver;
use crate::{AppError, Result};

use super::db::Database;

/// Length of the hex prefix used as an app's local id.
const LOCAL_ID_LEN: usize = 16;

/// Repository for tracked apps and their namespaces.
#[derive(Clone)]
pub struct AppRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct AppRow {
    local_id: String,
    root: String,
    platform_id: Option<String>,
    created_at: String,
}

impl AppRow {
    fn into_app(self) -> Result<App> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);
        Ok(App {
            local_id: self.local_id,
            root: self.root.into(),
            platform_id: self.platform_id,
            created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NamespaceRow {
    id: String,
    app_id: String,
    name: String,
    active: i64,
}

impl From<NamespaceRow> for Namespace {
    fn from(row: NamespaceRow) -> Self {
        Self {
            id: row.id,
            app_id: row.app_id,
            name: row.name,
            active: row.active != 0,
        }
    }
}

/// Local id for an app rooted at the canonical path `root`.
#[must_use]
pub fn local_id_for(root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root.to_string_lossy().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..LOCAL_ID_LEN].to_owned()
}

impl AppRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Track the app rooted at `root`, returning the stored record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AppResolution` if the root is not a directory, or
    /// `AppError::Db` if the database operation fails.
    pub async fn track_root(&self, root: &Path) -> Result<App> {
        let canonical = root.canonicalize().map_err(|err| {
            AppError::AppResolution(format!("{}: {err}", root.display()))
        })?;
        if !canonical.is_dir() {
            return Err(AppError::AppResolution(format!(
                "{} is not a directory",
                canonical.display()
            )));
        }

        let local_id = local_id_for(&canonical);
        let root_str = canonical.to_string_lossy().into_owned();
        let created = sqlx::query(
            "INSERT INTO app (local_id, root, platform_id, created_at)
             VALUES (?1, ?2, NULL, ?3)
             ON CONFLICT(local_id) DO NOTHING",
        )
        .bind(&local_id)
        .bind(&root_str)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.as_ref())
        .await?
        .rows_affected();
        if created > 0 {
            info!(local_id, root = root_str, "tracking new app");
        }

        self.get_app(&local_id)
            .await?
            .ok_or_else(|| AppError::AppResolution(format!("app {local_id} vanished")))
    }

    /// Retrieve an app by local id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_app(&self, local_id: &str) -> Result<Option<App>> {
        let row: Option<AppRow> = sqlx::query_as(
            "SELECT local_id, root, platform_id, created_at FROM app WHERE local_id = ?1",
        )
        .bind(local_id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(AppRow::into_app).transpose()
    }

    /// Link the app to a hosted platform id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the app is unknown.
    pub async fn set_platform_id(&self, local_id: &str, platform_id: &str) -> Result<()> {
        let updated = sqlx::query("UPDATE app SET platform_id = ?1 WHERE local_id = ?2")
            .bind(platform_id)
            .bind(local_id)
            .execute(self.db.as_ref())
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(AppError::NotFound(format!("app {local_id}")));
        }
        Ok(())
    }

    /// Resolve `name`, or the active namespace when `name` is `None`.
    ///
    /// A named namespace that does not exist yet is created inactive. An
    /// app without an active namespace gets an active `default` one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Namespace` if the name is invalid or the lookup fails.
    pub async fn resolve_namespace(&self, app: &App, name: Option<&str>) -> Result<Namespace> {
        let result = match name {
            Some(name) => {
                let name = validate_name(name)?;
                match self.find_namespace(&app.local_id, name).await? {
                    Some(ns) => Ok(ns),
                    None => self.create_namespace(&app.local_id, name, false).await,
                }
            }
            None => match self.active_namespace(&app.local_id).await? {
                Some(ns) => Ok(ns),
                None => match self.find_namespace(&app.local_id, DEFAULT_NAMESPACE).await? {
                    Some(ns) => self.activate(app, &ns.name).await,
                    None => {
                        self.create_namespace(&app.local_id, DEFAULT_NAMESPACE, true)
                            .await
                    }
                },
            },
        };
        result.map_err(|err| match err {
            AppError::Namespace(_) => err,
            other => AppError::Namespace(other.to_string()),
        })
    }

    /// Make `name` the app's active namespace, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Namespace` for an invalid name or `AppError::Db`
    /// if the update fails.
    pub async fn activate(&self, app: &App, name: &str) -> Result<Namespace> {
        let name = validate_name(name)?;
        if self.find_namespace(&app.local_id, name).await?.is_none() {
            self.create_namespace(&app.local_id, name, false).await?;
        }

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE namespace SET active = 0 WHERE app_id = ?1")
            .bind(&app.local_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE namespace SET active = 1 WHERE app_id = ?1 AND name = ?2")
            .bind(&app.local_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.find_namespace(&app.local_id, name)
            .await?
            .ok_or_else(|| AppError::Namespace(format!("namespace {name} vanished")))
    }

    /// List the app's namespaces ordered by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_namespaces(&self, app: &App) -> Result<Vec<Namespace>> {
        let rows: Vec<NamespaceRow> = sqlx::query_as(
            "SELECT id, app_id, name, active FROM namespace WHERE app_id = ?1 ORDER BY name",
        )
        .bind(&app.local_id)
        .fetch_all(self.db.as_ref())
        .await?;
        Ok(rows.into_iter().map(Namespace::from).collect())
    }

    async fn find_namespace(&self, app_id: &str, name: &str) -> Result<Option<Namespace>> {
        let row: Option<NamespaceRow> = sqlx::query_as(
            "SELECT id, app_id, name, active FROM namespace WHERE app_id = ?1 AND name = ?2",
        )
        .bind(app_id)
        .bind(name)
        .fetch_optional(self.db.as_ref())
        .await?;
        Ok(row.map(Namespace::from))
    }

    async fn active_namespace(&self, app_id: &str) -> Result<Option<Namespace>> {
        let row: Option<NamespaceRow> = sqlx::query_as(
            "SELECT id, app_id, name, active FROM namespace WHERE app_id = ?1 AND active = 1",
        )
        .bind(app_id)
        .fetch_optional(self.db.as_ref())
        .await?;
        Ok(row.map(Namespace::from))
    }

    async fn create_namespace(&self, app_id: &str, name: &str, active: bool) -> Result<Namespace> {
        let ns = Namespace {
            id: uuid::Uuid::new_v4().to_string(),
            app_id: app_id.to_owned(),
            name: name.to_owned(),
            active,
        };
        sqlx::query(
            "INSERT INTO namespace (id, app_id, name, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&ns.id)
        .bind(&ns.app_id)
        .bind(&ns.name)
        .bind(i64::from(ns.active))
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        info!(app_id, name, active, "created namespace");
        Ok(ns)
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(AppError::Namespace(format!("invalid namespace name {name:?}")))
    }
}

impl AppResolver for AppRepo {
    fn track<'a>(
        &'a self,
        root: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<App>> + Send + 'a>> {
        Box::pin(self.track_root(root))
    }

    fn namespace_or_active<'a>(
        &'a self,
        app: &'a App,
        name: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Namespace>> + Send + 'a>> {
        Box::pin(self.resolve_namespace(app, name))
    }
}
