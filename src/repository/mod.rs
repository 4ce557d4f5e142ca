//! Persistence for tasks and per-host execution records
//!
//! The engine only talks to storage through [`TaskRepository`]. Status writes
//! that can race with cancellation are expressed as compare-and-set operations
//! so that a record never regresses out of a terminal status.

mod memory;
/// PostgreSQL backend
pub mod postgres;

pub use memory::InMemoryTaskRepository;
pub use postgres::{PostgresConfig, PostgresTaskRepository};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::task::{HostExecution, HostExecutionStatus, Task, TaskStatus};

/// Errors related to task persistence
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// No such task or host record
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record with the same key already exists
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// A stored value could not be parsed
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// Any other backend failure
    #[error("Storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Storage contract required by the engine
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Load a task by id
    async fn load_task(&self, task_id: &str) -> Result<Task, RepositoryError>;

    /// Insert or overwrite a task
    async fn save_task(&self, task: &Task) -> Result<(), RepositoryError>;

    /// Write a task's lifecycle fields (`status`, `total_hosts`, `started_at`,
    /// `completed_at`) only if its stored status is one of `from`.
    ///
    /// The progress counters are never touched here; they belong to
    /// [`TaskRepository::update_task_counters`]. Returns `false` when the stored
    /// status did not match and nothing was written.
    async fn transition_task(
        &self,
        task: &Task,
        from: &[TaskStatus],
    ) -> Result<bool, RepositoryError>;

    /// Write the progress counters without touching any other field
    async fn update_task_counters(
        &self,
        task_id: &str,
        completed_hosts: usize,
        failed_hosts: usize,
    ) -> Result<(), RepositoryError>;

    /// Insert a batch of host records; either all are stored or none are
    async fn create_host_executions(
        &self,
        records: &[HostExecution],
    ) -> Result<(), RepositoryError>;

    /// Load the record for one (task, host) pair
    async fn load_host_execution(
        &self,
        task_id: &str,
        host_id: &str,
    ) -> Result<HostExecution, RepositoryError>;

    /// Overwrite a host record only if its stored status is one of `expected`.
    ///
    /// Returns `false` when the stored status did not match and nothing was written.
    async fn save_host_execution(
        &self,
        record: &HostExecution,
        expected: &[HostExecutionStatus],
    ) -> Result<bool, RepositoryError>;

    /// All host records of a task, in creation order
    async fn list_host_executions(
        &self,
        task_id: &str,
    ) -> Result<Vec<HostExecution>, RepositoryError>;

    /// Count a task's host records whose status is in `statuses`
    async fn count_host_executions(
        &self,
        task_id: &str,
        statuses: &[HostExecutionStatus],
    ) -> Result<usize, RepositoryError>;

    /// Move every record of a task whose status is in `statuses` to `new_status`.
    ///
    /// Returns the number of records changed.
    async fn bulk_update_host_executions(
        &self,
        task_id: &str,
        statuses: &[HostExecutionStatus],
        new_status: HostExecutionStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<usize, RepositoryError>;
}
