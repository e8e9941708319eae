//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`, so this is safe to
//! re-run on every daemon startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS app (
    local_id        TEXT PRIMARY KEY NOT NULL,
    root            TEXT NOT NULL UNIQUE,
    platform_id     TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS namespace (
    id              TEXT PRIMARY KEY NOT NULL,
    app_id          TEXT NOT NULL REFERENCES app(local_id),
    name            TEXT NOT NULL,
    active          INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    UNIQUE(app_id, name)
);

CREATE INDEX IF NOT EXISTS idx_namespace_active ON namespace(app_id, active);
";
    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
