pub mod check_executor;
pub mod config;
pub mod db;
pub mod error;
pub mod field_path;
pub mod http_client;
pub mod lock;
pub mod models;
pub mod scheduler;
pub mod store;
pub mod telemetry;

pub use check_executor::{CheckExecutor, RetryPolicy};
pub use config::HealthCheckerConfig;
pub use error::CheckerError;
pub use field_path::field_exists;
pub use http_client::{HttpClient, MockHttpClient, ReqwestHttpClient};
pub use lock::{AdvisoryLock, MockSchedulerLock, SchedulerLock};
pub use models::{
    CheckDefinition, CheckStatus, ExecutionRecord, ExecutionResult, NewCheckDefinition, ProbeSpec,
};
pub use scheduler::{execute_and_record, JobInfo, JobScheduler, SchedulerHealth, SchedulerSettings};
pub use store::{CheckStore, MockCheckStore, SqlCheckStore};
