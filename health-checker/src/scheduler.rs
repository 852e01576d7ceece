//! Recurring check scheduler.
//!
//! Every check definition gets its own timer task on the tokio runtime. A
//! fire spawns the check pipeline as a separate task so HTTP calls and backoff
//! sleeps never hold up other timers, while a per-job in-flight flag keeps at
//! most one run of the same check alive. Only one scheduler instance runs
//! across processes: `start` must win the `SchedulerLock` first.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::check_executor::CheckExecutor;
use crate::error::CheckerError;
use crate::lock::SchedulerLock;
use crate::models::{CheckDefinition, ExecutionRecord, ProbeSpec};
use crate::store::CheckStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub enabled: bool,
    /// A fire later than this after its due time is dropped.
    pub misfire_grace: Duration,
    /// How often the job table is reconciled with the stored definitions.
    pub sync_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            misfire_grace: Duration::from_secs(30),
            sync_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerHealth {
    pub running: bool,
    pub jobstore_reachable: bool,
    pub job_count: Option<usize>,
    pub scheduler_enabled: bool,
    pub lock_held: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    pub key: String,
    pub check_id: i64,
    pub interval_minutes: u32,
}

pub fn job_key(check_id: i64) -> String {
    format!("check_{check_id}")
}

struct ScheduledJob {
    check_id: i64,
    interval_minutes: u32,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct Engine {
    running: bool,
    jobs: HashMap<String, ScheduledJob>,
    /// Per-key in-flight flags. They outlive timer replacement so a new
    /// timer still sees a run started by the one it replaced.
    in_flight: HashMap<String, Arc<AtomicBool>>,
    sync_task: Option<JoinHandle<()>>,
}

struct SchedulerInner {
    store: Arc<dyn CheckStore>,
    executor: Arc<CheckExecutor>,
    lock: Arc<dyn SchedulerLock>,
    settings: SchedulerSettings,
    engine: Mutex<Engine>,
}

#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    pub fn new(
        store: Arc<dyn CheckStore>,
        executor: Arc<CheckExecutor>,
        lock: Arc<dyn SchedulerLock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                executor,
                lock,
                settings,
                engine: Mutex::new(Engine::default()),
            }),
        }
    }

    /// Starts scheduling when enabled and the cluster lock is won. Never
    /// fails: a disabled scheduler or a denied lock leaves it stopped.
    pub async fn start(&self) {
        let mut engine = self.inner.engine.lock().await;
        if engine.running {
            return;
        }
        if !self.inner.settings.enabled {
            info!("Scheduler disabled by configuration; not starting");
            return;
        }
        if !self.inner.lock.acquire().await {
            warn!("Scheduler lock held by another instance; staying stopped");
            return;
        }

        engine.running = true;
        match self.inner.store.list_checks().await {
            Ok(definitions) => {
                for definition in &definitions {
                    self.inner.install_job(&mut engine, definition);
                }
                info!(jobs = engine.jobs.len(), "Scheduler started");
            }
            Err(e) => {
                error!(error = %e, "Scheduler started but loading checks failed; next sync will retry");
            }
        }
        engine.sync_task = Some(spawn_sync_loop(
            Arc::downgrade(&self.inner),
            self.inner.settings.sync_interval,
        ));
    }

    /// Stops every timer and releases the lock. Runs already in flight are
    /// left to finish; no new fire happens once this returns.
    pub async fn stop(&self) {
        let mut engine = self.inner.engine.lock().await;
        if engine.running {
            engine.running = false;
            let mut timers: Vec<JoinHandle<()>> =
                engine.jobs.drain().map(|(_, job)| job.timer).collect();
            timers.extend(engine.sync_task.take());
            for timer in &timers {
                timer.abort();
            }
            for timer in timers {
                let _ = timer.await;
            }
            info!("Scheduler stopped");
        }
        self.inner.lock.release().await;
    }

    /// Registers a fixed-interval job for the definition, replacing any job
    /// with the same key. A stopped scheduler ignores the call; the
    /// definition is loaded on the next `start`.
    pub async fn schedule_job(&self, definition: &CheckDefinition) {
        let mut engine = self.inner.engine.lock().await;
        if !engine.running {
            debug!(check_id = definition.id, "Scheduler not running; job will be loaded on start");
            return;
        }
        self.inner.install_job(&mut engine, definition);
    }

    pub async fn unschedule_job(&self, check_id: i64) -> bool {
        let mut engine = self.inner.engine.lock().await;
        match engine.jobs.remove(&job_key(check_id)) {
            Some(job) => {
                job.timer.abort();
                info!(check_id, "Unscheduled check");
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.engine.lock().await.running
    }

    pub async fn jobs(&self) -> Vec<JobInfo> {
        let engine = self.inner.engine.lock().await;
        let mut jobs: Vec<JobInfo> = engine
            .jobs
            .iter()
            .map(|(key, job)| JobInfo {
                key: key.clone(),
                check_id: job.check_id,
                interval_minutes: job.interval_minutes,
            })
            .collect();
        jobs.sort_by_key(|job| job.check_id);
        jobs
    }

    /// Never fails; an unreachable store is reported as a flag.
    pub async fn health(&self) -> SchedulerHealth {
        let (running, job_total) = {
            let engine = self.inner.engine.lock().await;
            (engine.running, engine.jobs.len())
        };
        let jobstore_reachable = match self.inner.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Scheduler job store unreachable");
                false
            }
        };

        SchedulerHealth {
            running,
            jobstore_reachable,
            job_count: jobstore_reachable.then_some(job_total),
            scheduler_enabled: self.inner.settings.enabled,
            lock_held: self.inner.lock.is_held(),
        }
    }

    /// Brings the job table in line with the stored definitions: schedules
    /// new ones, drops vanished ones, replaces jobs whose interval changed.
    pub async fn reconcile(&self) -> Result<(), CheckerError> {
        self.inner.reconcile().await
    }
}

impl SchedulerInner {
    fn install_job(&self, engine: &mut Engine, definition: &CheckDefinition) {
        let key = job_key(definition.id);
        if let Some(previous) = engine.jobs.remove(&key) {
            previous.timer.abort();
        }

        let in_flight = engine.in_flight.entry(key.clone()).or_default().clone();
        let period = Duration::from_secs(u64::from(definition.interval_minutes.max(1)) * 60);
        let timer = spawn_job_timer(
            self.store.clone(),
            self.executor.clone(),
            definition.id,
            period,
            self.settings.misfire_grace,
            in_flight,
        );
        engine.jobs.insert(
            key,
            ScheduledJob {
                check_id: definition.id,
                interval_minutes: definition.interval_minutes,
                timer,
            },
        );
        info!(
            check_id = definition.id,
            name = %definition.name,
            interval_minutes = definition.interval_minutes,
            "Scheduled check"
        );
    }

    async fn reconcile(&self) -> Result<(), CheckerError> {
        let definitions = self.store.list_checks().await?;
        let mut engine = self.engine.lock().await;
        if !engine.running {
            return Ok(());
        }

        let desired: HashSet<String> = definitions.iter().map(|d| job_key(d.id)).collect();
        let vanished: Vec<String> = engine
            .jobs
            .keys()
            .filter(|key| !desired.contains(*key))
            .cloned()
            .collect();
        for key in vanished {
            if let Some(job) = engine.jobs.remove(&key) {
                job.timer.abort();
                info!(check_id = job.check_id, "Removed job for deleted check");
            }
        }
        engine
            .in_flight
            .retain(|key, flag| desired.contains(key) || flag.load(Ordering::Acquire));

        for definition in &definitions {
            let up_to_date = engine
                .jobs
                .get(&job_key(definition.id))
                .is_some_and(|job| job.interval_minutes == definition.interval_minutes);
            if !up_to_date {
                self.install_job(&mut engine, definition);
            }
        }
        Ok(())
    }

    /// Tears the engine down after the cluster lock vanished underneath it.
    async fn halt_after_lock_loss(&self) {
        let mut engine = self.engine.lock().await;
        if !engine.running {
            return;
        }
        engine.running = false;
        for (_, job) in engine.jobs.drain() {
            job.timer.abort();
        }
        // Called from the sync task itself; detach rather than abort it.
        engine.sync_task.take();
        error!("Scheduler lock lost; stopped scheduling");
    }
}

fn spawn_sync_loop(inner: Weak<SchedulerInner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if !inner.lock.verify().await {
                inner.halt_after_lock_loss().await;
                break;
            }
            if let Err(e) = inner.reconcile().await {
                warn!(error = %e, "Scheduler sync failed; keeping current jobs");
            }
        }
    })
}

/// Clears the in-flight flag when a run ends, including by panic.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn spawn_job_timer(
    store: Arc<dyn CheckStore>,
    executor: Arc<CheckExecutor>,
    check_id: i64,
    period: Duration,
    misfire_grace: Duration,
    in_flight: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        // Missed ticks collapse into a single late fire.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let due = ticker.tick().await;
            let lateness = due.elapsed();
            if lateness > misfire_grace {
                warn!(
                    check_id,
                    late_ms = lateness.as_millis() as u64,
                    "Check fire missed its grace period; skipping"
                );
                continue;
            }
            if in_flight.swap(true, Ordering::AcqRel) {
                warn!(check_id, "Previous run still in progress; skipping fire");
                continue;
            }

            let guard = InFlight(in_flight.clone());
            let store = store.clone();
            let executor = executor.clone();
            tokio::spawn(async move {
                let _guard = guard;
                let run = tokio::spawn(async move {
                    run_check_job(store.as_ref(), executor.as_ref(), check_id).await
                });
                match run.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(check_id, error = %e, "Scheduled check failed"),
                    Err(e) if e.is_panic() => error!(check_id, "Scheduled check panicked"),
                    Err(_) => {}
                }
            });
        }
    })
}

/// One scheduled fire: reload the definition, probe, persist.
pub async fn run_check_job(
    store: &dyn CheckStore,
    executor: &CheckExecutor,
    check_id: i64,
) -> Result<(), CheckerError> {
    let Some(definition) = store.get_check(check_id).await? else {
        warn!(check_id, "Check not found; skipping scheduled run");
        return Ok(());
    };

    let record = execute_and_record(store, executor, &definition).await?;
    info!(
        check_id,
        name = %definition.name,
        status = %record.status,
        latency_ms = record.latency_ms,
        "Check executed"
    );
    Ok(())
}

pub async fn execute_and_record(
    store: &dyn CheckStore,
    executor: &CheckExecutor,
    definition: &CheckDefinition,
) -> Result<ExecutionRecord, CheckerError> {
    let spec = ProbeSpec::from(definition);
    let result = executor.execute(&spec).await;
    store.insert_execution(definition.id, &result).await
}
