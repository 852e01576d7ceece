use async_trait::async_trait;
use sqlx::any::install_default_drivers;
use sqlx::{AnyConnection, Connection};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::db::Backend;
use crate::error::CheckerError;

/// Cluster-wide mutual exclusion for the scheduler.
#[async_trait]
pub trait SchedulerLock: Send + Sync {
    /// Non-blocking; false when another instance holds the lock.
    async fn acquire(&self) -> bool;

    /// Safe to call when nothing is held.
    async fn release(&self);

    fn is_held(&self) -> bool;

    /// Confirms a held lock is still in force. A lost lock is dropped and
    /// reported as false.
    async fn verify(&self) -> bool;
}

/// Postgres session-level advisory lock held on a dedicated connection for
/// as long as the lock is held. Backends without advisory locks are assumed
/// to be single-instance deployments and always grant it.
pub struct AdvisoryLock {
    database_url: String,
    lock_id: i64,
    backend: Backend,
    connection: Mutex<Option<AnyConnection>>,
    held: AtomicBool,
}

impl AdvisoryLock {
    pub fn new(database_url: &str, lock_id: i64) -> Result<Self, CheckerError> {
        install_default_drivers();
        Ok(Self {
            database_url: database_url.to_string(),
            lock_id,
            backend: Backend::from_url(database_url)?,
            connection: Mutex::new(None),
            held: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl SchedulerLock for AdvisoryLock {
    async fn acquire(&self) -> bool {
        let mut connection = self.connection.lock().await;
        if self.held.load(Ordering::SeqCst) {
            return true;
        }

        if !self.backend.supports_advisory_locks() {
            info!(
                backend = ?self.backend,
                "Backend has no advisory locks; assuming a single scheduler instance"
            );
            self.held.store(true, Ordering::SeqCst);
            return true;
        }

        let mut conn = match AnyConnection::connect(&self.database_url).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "Failed to open scheduler lock connection");
                return false;
            }
        };

        let granted = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(self.lock_id)
            .fetch_one(&mut conn)
            .await;

        match granted {
            Ok(true) => {
                info!(lock_id = self.lock_id, "Scheduler advisory lock acquired");
                *connection = Some(conn);
                self.held.store(true, Ordering::SeqCst);
                true
            }
            Ok(false) => {
                info!(lock_id = self.lock_id, "Scheduler advisory lock held by another instance");
                if let Err(e) = conn.close().await {
                    warn!(error = %e, "Failed to close scheduler lock connection");
                }
                false
            }
            Err(e) => {
                error!(lock_id = self.lock_id, error = %e, "Scheduler advisory lock query failed");
                if let Err(e) = conn.close().await {
                    warn!(error = %e, "Failed to close scheduler lock connection");
                }
                false
            }
        }
    }

    async fn release(&self) {
        let mut connection = self.connection.lock().await;
        if let Some(mut conn) = connection.take() {
            match sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
                .bind(self.lock_id)
                .fetch_one(&mut conn)
                .await
            {
                Ok(true) => info!(lock_id = self.lock_id, "Scheduler advisory lock released"),
                Ok(false) => warn!(lock_id = self.lock_id, "Scheduler advisory lock was not held"),
                Err(e) => error!(lock_id = self.lock_id, error = %e, "Failed to release advisory lock"),
            }
            // Closing the session drops the lock even if the unlock failed.
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close scheduler lock connection");
            }
        }
        self.held.store(false, Ordering::SeqCst);
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    async fn verify(&self) -> bool {
        let mut connection = self.connection.lock().await;
        if !self.held.load(Ordering::SeqCst) {
            return false;
        }
        if !self.backend.supports_advisory_locks() {
            return true;
        }

        // The session lock lives exactly as long as its connection.
        let alive = match connection.as_mut() {
            Some(conn) => match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(conn).await {
                Ok(_) => true,
                Err(e) => {
                    error!(lock_id = self.lock_id, error = %e, "Scheduler lock connection lost");
                    false
                }
            },
            None => false,
        };

        if !alive {
            if let Some(conn) = connection.take() {
                if let Err(e) = conn.close().await {
                    warn!(error = %e, "Failed to close scheduler lock connection");
                }
            }
            self.held.store(false, Ordering::SeqCst);
        }
        alive
    }
}

/// Lock with a fixed answer that counts its calls.
pub struct MockSchedulerLock {
    grant: bool,
    held: AtomicBool,
    acquire_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

impl MockSchedulerLock {
    pub fn granted() -> Self {
        Self::with_grant(true)
    }

    pub fn denied() -> Self {
        Self::with_grant(false)
    }

    fn with_grant(grant: bool) -> Self {
        Self {
            grant,
            held: AtomicBool::new(false),
            acquire_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
        }
    }

    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    /// Simulates the lock vanishing underneath its holder.
    pub fn revoke(&self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl SchedulerLock for MockSchedulerLock {
    async fn acquire(&self) -> bool {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        if self.grant {
            self.held.store(true, Ordering::SeqCst);
        }
        self.grant
    }

    async fn release(&self) {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.held.store(false, Ordering::SeqCst);
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    async fn verify(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}
