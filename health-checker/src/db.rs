use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::AnyPool;
use tracing::info;

use crate::error::CheckerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    pub fn from_url(url: &str) -> Result<Self, CheckerError> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else {
            Err(CheckerError::Config(format!(
                "unsupported database url scheme in '{}'",
                url.split("://").next().unwrap_or(url)
            )))
        }
    }

    /// Only Postgres offers session-level advisory locks.
    pub fn supports_advisory_locks(&self) -> bool {
        matches!(self, Self::Postgres)
    }

    fn schema(&self) -> &'static [&'static str] {
        match self {
            Self::Postgres => POSTGRES_SCHEMA,
            Self::Sqlite => SQLITE_SCHEMA,
        }
    }
}

const POSTGRES_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS checks (
        id                   BIGSERIAL PRIMARY KEY,
        name                 TEXT NOT NULL,
        url                  TEXT NOT NULL,
        required_fields      TEXT NOT NULL,
        expected_status_code INTEGER NOT NULL DEFAULT 200,
        latency_threshold_ms BIGINT,
        interval_minutes     INTEGER NOT NULL DEFAULT 5 CHECK (interval_minutes > 0),
        created_at           TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_checks_name_idx ON checks (name)",
    "CREATE TABLE IF NOT EXISTS check_executions (
        id                 BIGSERIAL PRIMARY KEY,
        check_id           BIGINT NOT NULL REFERENCES checks(id) ON DELETE CASCADE,
        status             TEXT NOT NULL,
        missing_fields     TEXT NOT NULL,
        actual_status_code INTEGER,
        latency_ms         DOUBLE PRECISION NOT NULL,
        error              TEXT,
        executed_at        TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS ix_check_executions_check_id
        ON check_executions (check_id, executed_at)",
];

const SQLITE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS checks (
        id                   INTEGER PRIMARY KEY AUTOINCREMENT,
        name                 TEXT NOT NULL,
        url                  TEXT NOT NULL,
        required_fields      TEXT NOT NULL,
        expected_status_code INTEGER NOT NULL DEFAULT 200,
        latency_threshold_ms INTEGER,
        interval_minutes     INTEGER NOT NULL DEFAULT 5 CHECK (interval_minutes > 0),
        created_at           TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_checks_name_idx ON checks (name)",
    "CREATE TABLE IF NOT EXISTS check_executions (
        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
        check_id           INTEGER NOT NULL REFERENCES checks(id) ON DELETE CASCADE,
        status             TEXT NOT NULL,
        missing_fields     TEXT NOT NULL,
        actual_status_code INTEGER,
        latency_ms         REAL NOT NULL,
        error              TEXT,
        executed_at        TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS ix_check_executions_check_id
        ON check_executions (check_id, executed_at)",
];

pub async fn connect_pool(url: &str, max_connections: u32) -> Result<AnyPool, CheckerError> {
    install_default_drivers();

    let mut options = AnyPoolOptions::new().max_connections(max_connections);
    // Each connection to an in-memory SQLite database is a separate database.
    if url.contains(":memory:") {
        options = options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    Ok(options.connect(url).await?)
}

/// Creates tables and indexes when missing. Safe to call on every startup.
pub async fn init_schema(pool: &AnyPool, backend: Backend) -> Result<(), CheckerError> {
    for statement in backend.schema() {
        sqlx::query(*statement).execute(pool).await?;
    }
    info!(?backend, "Database schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_url() {
        assert_eq!(
            Backend::from_url("postgres://u:p@localhost/db").unwrap(),
            Backend::Postgres
        );
        assert_eq!(
            Backend::from_url("postgresql://localhost/db").unwrap(),
            Backend::Postgres
        );
        assert_eq!(Backend::from_url("sqlite::memory:").unwrap(), Backend::Sqlite);
        assert_eq!(
            Backend::from_url("sqlite://api_monitor.db?mode=rwc").unwrap(),
            Backend::Sqlite
        );
        assert!(matches!(
            Backend::from_url("mysql://localhost/db"),
            Err(CheckerError::Config(_))
        ));
    }

    #[test]
    fn test_only_postgres_has_advisory_locks() {
        assert!(Backend::Postgres.supports_advisory_locks());
        assert!(!Backend::Sqlite.supports_advisory_locks());
    }

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let pool = connect_pool("sqlite::memory:", 1).await.unwrap();
        init_schema(&pool, Backend::Sqlite).await.unwrap();
        init_schema(&pool, Backend::Sqlite).await.unwrap();

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('checks', 'check_executions')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tables, 2);
    }
}
