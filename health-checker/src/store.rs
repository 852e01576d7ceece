use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::db::{self, Backend};
use crate::error::CheckerError;
use crate::models::{CheckDefinition, ExecutionRecord, ExecutionResult, NewCheckDefinition};

#[async_trait]
pub trait CheckStore: Send + Sync {
    async fn list_checks(&self) -> Result<Vec<CheckDefinition>, CheckerError>;

    async fn get_check(&self, id: i64) -> Result<Option<CheckDefinition>, CheckerError>;

    async fn create_check(
        &self,
        new_check: &NewCheckDefinition,
    ) -> Result<CheckDefinition, CheckerError>;

    /// Deletes the definition together with its execution history.
    async fn delete_check(&self, id: i64) -> Result<bool, CheckerError>;

    async fn insert_execution(
        &self,
        check_id: i64,
        result: &ExecutionResult,
    ) -> Result<ExecutionRecord, CheckerError>;

    /// Newest first.
    async fn check_history(
        &self,
        check_id: i64,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, CheckerError>;

    async fn ping(&self) -> Result<(), CheckerError>;
}

pub struct SqlCheckStore {
    pool: AnyPool,
    backend: Backend,
}

impl SqlCheckStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, CheckerError> {
        let backend = Backend::from_url(url)?;
        let pool = db::connect_pool(url, max_connections).await?;
        Ok(Self { pool, backend })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub async fn init_schema(&self) -> Result<(), CheckerError> {
        db::init_schema(&self.pool, self.backend).await
    }
}

const CHECK_COLUMNS: &str = "id, name, url, required_fields, expected_status_code, \
     latency_threshold_ms, interval_minutes, created_at";

const EXECUTION_COLUMNS: &str = "id, check_id, status, missing_fields, actual_status_code, \
     latency_ms, error, executed_at";

#[async_trait]
impl CheckStore for SqlCheckStore {
    async fn list_checks(&self) -> Result<Vec<CheckDefinition>, CheckerError> {
        let rows = sqlx::query(&format!("SELECT {CHECK_COLUMNS} FROM checks ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(definition_from_row).collect()
    }

    async fn get_check(&self, id: i64) -> Result<Option<CheckDefinition>, CheckerError> {
        let row = sqlx::query(&format!("SELECT {CHECK_COLUMNS} FROM checks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(definition_from_row).transpose()
    }

    async fn create_check(
        &self,
        new_check: &NewCheckDefinition,
    ) -> Result<CheckDefinition, CheckerError> {
        new_check.validate()?;

        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM checks WHERE name = $1")
            .bind(new_check.name.as_str())
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(CheckerError::DuplicateName(new_check.name.clone()));
        }

        let latency_threshold_ms = new_check
            .latency_threshold_ms
            .map(i64::try_from)
            .transpose()
            .map_err(|_| CheckerError::Validation("latency_threshold_ms is too large".into()))?;
        let interval_minutes = i32::try_from(new_check.interval_minutes)
            .map_err(|_| CheckerError::Validation("interval_minutes is too large".into()))?;
        let created_at = now();

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO checks (name, url, required_fields, expected_status_code, \
             latency_threshold_ms, interval_minutes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(new_check.name.as_str())
        .bind(new_check.url.as_str())
        .bind(serde_json::to_string(&new_check.required_fields)?)
        .bind(i32::from(new_check.expected_status_code))
        .bind(latency_threshold_ms)
        .bind(interval_minutes)
        .bind(format_timestamp(&created_at))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                CheckerError::DuplicateName(new_check.name.clone())
            }
            _ => CheckerError::Database(e),
        })?;

        Ok(CheckDefinition {
            id,
            name: new_check.name.clone(),
            url: new_check.url.clone(),
            required_fields: new_check.required_fields.clone(),
            expected_status_code: new_check.expected_status_code,
            latency_threshold_ms: new_check.latency_threshold_ms,
            interval_minutes: new_check.interval_minutes,
            created_at,
        })
    }

    async fn delete_check(&self, id: i64) -> Result<bool, CheckerError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM check_executions WHERE check_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM checks WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn insert_execution(
        &self,
        check_id: i64,
        result: &ExecutionResult,
    ) -> Result<ExecutionRecord, CheckerError> {
        let executed_at = now();

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO check_executions (check_id, status, missing_fields, \
             actual_status_code, latency_ms, error, executed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(check_id)
        .bind(result.status.as_str())
        .bind(serde_json::to_string(&result.missing_fields)?)
        .bind(result.status_code.map(i32::from))
        .bind(result.latency_ms)
        .bind(result.error.clone())
        .bind(format_timestamp(&executed_at))
        .fetch_one(&self.pool)
        .await?;

        Ok(ExecutionRecord {
            id,
            check_id,
            status: result.status,
            missing_fields: result.missing_fields.clone(),
            status_code: result.status_code,
            latency_ms: result.latency_ms,
            error: result.error.clone(),
            executed_at,
        })
    }

    async fn check_history(
        &self,
        check_id: i64,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, CheckerError> {
        let rows = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM check_executions WHERE check_id = $1 \
             ORDER BY executed_at DESC, id DESC LIMIT $2"
        ))
        .bind(check_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn ping(&self) -> Result<(), CheckerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn definition_from_row(row: &AnyRow) -> Result<CheckDefinition, CheckerError> {
    let required_fields: String = row.try_get("required_fields")?;
    let expected_status_code: i32 = row.try_get("expected_status_code")?;
    let latency_threshold_ms: Option<i64> = row.try_get("latency_threshold_ms")?;
    let interval_minutes: i32 = row.try_get("interval_minutes")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(CheckDefinition {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        required_fields: serde_json::from_str(&required_fields)?,
        expected_status_code: u16::try_from(expected_status_code).map_err(|_| {
            CheckerError::InvalidRecord(format!("status code {expected_status_code}"))
        })?,
        latency_threshold_ms: latency_threshold_ms
            .map(u64::try_from)
            .transpose()
            .map_err(|_| CheckerError::InvalidRecord("negative latency threshold".into()))?,
        interval_minutes: u32::try_from(interval_minutes).map_err(|_| {
            CheckerError::InvalidRecord(format!("interval {interval_minutes}"))
        })?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn record_from_row(row: &AnyRow) -> Result<ExecutionRecord, CheckerError> {
    let status: String = row.try_get("status")?;
    let missing_fields: String = row.try_get("missing_fields")?;
    let status_code: Option<i32> = row.try_get("actual_status_code")?;
    let executed_at: String = row.try_get("executed_at")?;

    Ok(ExecutionRecord {
        id: row.try_get("id")?,
        check_id: row.try_get("check_id")?,
        status: status.parse()?,
        missing_fields: serde_json::from_str(&missing_fields)?,
        status_code: status_code
            .map(u16::try_from)
            .transpose()
            .map_err(|_| CheckerError::InvalidRecord("status code out of range".into()))?,
        latency_ms: row.try_get("latency_ms")?,
        error: row.try_get("error")?,
        executed_at: parse_timestamp(&executed_at)?,
    })
}

/// Microsecond precision so stored timestamps read back unchanged.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CheckerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|e| CheckerError::InvalidRecord(format!("timestamp '{raw}': {e}")))
}

#[derive(Default)]
struct MockState {
    checks: BTreeMap<i64, CheckDefinition>,
    executions: Vec<ExecutionRecord>,
    next_check_id: i64,
    next_execution_id: i64,
}

/// In-memory store for tests, with switches to simulate outages.
#[derive(Default)]
pub struct MockCheckStore {
    state: Mutex<MockState>,
    unreachable: AtomicBool,
    failing_inserts: Mutex<HashSet<i64>>,
}

impl MockCheckStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition directly, bypassing validation and name checks.
    pub fn insert_check(&self, new_check: NewCheckDefinition) -> CheckDefinition {
        let mut state = self.state.lock().unwrap();
        state.next_check_id += 1;
        let definition = CheckDefinition {
            id: state.next_check_id,
            name: new_check.name,
            url: new_check.url,
            required_fields: new_check.required_fields,
            expected_status_code: new_check.expected_status_code,
            latency_threshold_ms: new_check.latency_threshold_ms,
            interval_minutes: new_check.interval_minutes,
            created_at: now(),
        };
        state.checks.insert(definition.id, definition.clone());
        definition
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn fail_inserts_for(&self, check_id: i64) {
        self.failing_inserts.lock().unwrap().insert(check_id);
    }

    pub fn executions_for(&self, check_id: i64) -> Vec<ExecutionRecord> {
        self.state
            .lock()
            .unwrap()
            .executions
            .iter()
            .filter(|record| record.check_id == check_id)
            .cloned()
            .collect()
    }

    fn ensure_reachable(&self) -> Result<(), CheckerError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(CheckerError::StoreUnavailable("mock store is offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CheckStore for MockCheckStore {
    async fn list_checks(&self) -> Result<Vec<CheckDefinition>, CheckerError> {
        self.ensure_reachable()?;
        Ok(self.state.lock().unwrap().checks.values().cloned().collect())
    }

    async fn get_check(&self, id: i64) -> Result<Option<CheckDefinition>, CheckerError> {
        self.ensure_reachable()?;
        Ok(self.state.lock().unwrap().checks.get(&id).cloned())
    }

    async fn create_check(
        &self,
        new_check: &NewCheckDefinition,
    ) -> Result<CheckDefinition, CheckerError> {
        self.ensure_reachable()?;
        new_check.validate()?;
        let duplicate = self
            .state
            .lock()
            .unwrap()
            .checks
            .values()
            .any(|check| check.name == new_check.name);
        if duplicate {
            return Err(CheckerError::DuplicateName(new_check.name.clone()));
        }
        Ok(self.insert_check(new_check.clone()))
    }

    async fn delete_check(&self, id: i64) -> Result<bool, CheckerError> {
        self.ensure_reachable()?;
        let mut state = self.state.lock().unwrap();
        state.executions.retain(|record| record.check_id != id);
        Ok(state.checks.remove(&id).is_some())
    }

    async fn insert_execution(
        &self,
        check_id: i64,
        result: &ExecutionResult,
    ) -> Result<ExecutionRecord, CheckerError> {
        self.ensure_reachable()?;
        if self.failing_inserts.lock().unwrap().contains(&check_id) {
            return Err(CheckerError::StoreUnavailable(format!(
                "insert rejected for check {check_id}"
            )));
        }

        let mut state = self.state.lock().unwrap();
        state.next_execution_id += 1;
        let record = ExecutionRecord {
            id: state.next_execution_id,
            check_id,
            status: result.status,
            missing_fields: result.missing_fields.clone(),
            status_code: result.status_code,
            latency_ms: result.latency_ms,
            error: result.error.clone(),
            executed_at: now(),
        };
        state.executions.push(record.clone());
        Ok(record)
    }

    async fn check_history(
        &self,
        check_id: i64,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, CheckerError> {
        self.ensure_reachable()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .executions
            .iter()
            .rev()
            .filter(|record| record.check_id == check_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), CheckerError> {
        self.ensure_reachable()
    }
}
