//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` and are safe to
//! re-run on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS policy (
    name            TEXT PRIMARY KEY NOT NULL,
    spec            TEXT NOT NULL,
    generation      INTEGER NOT NULL DEFAULT 0,
    status          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS namespace (
    name            TEXT PRIMARY KEY NOT NULL,
    labels          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS certificate_request (
    namespace       TEXT NOT NULL,
    name            TEXT NOT NULL,
    uid             TEXT NOT NULL,
    body            TEXT NOT NULL,
    decision        TEXT CHECK(decision IN ('approved','denied')),
    reason          TEXT,
    message         TEXT,
    decided_at      TEXT,
    created_at      TEXT NOT NULL,
    PRIMARY KEY (namespace, name)
);

CREATE INDEX IF NOT EXISTS idx_request_pending
    ON certificate_request(decision, namespace);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
