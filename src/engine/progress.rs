//! Task-level progress counting and finalization

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::repository::{RepositoryError, TaskRepository};
use crate::task::{HostExecutionStatus, Task, TaskStatus};

/// Counters recomputed from the host records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    /// Hosts in `completed` or `failed`
    pub completed_hosts: usize,
    /// Hosts in `failed`
    pub failed_hosts: usize,
}

/// Single writer of a task's progress counters.
///
/// One tracker exists per execution; its mutex serializes the
/// count-then-write sequence so a stale count never lands after a newer one.
pub struct ProgressTracker {
    repository: Arc<dyn TaskRepository>,
    task_id: String,
    write_lock: Mutex<()>,
}

impl ProgressTracker {
    /// Create the tracker for one execution of `task_id`
    pub fn new(repository: Arc<dyn TaskRepository>, task_id: impl Into<String>) -> Self {
        Self {
            repository,
            task_id: task_id.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Recount finished and failed hosts and persist both counters
    pub async fn update_progress(&self) -> Result<ProgressSnapshot, RepositoryError> {
        let _guard = self.write_lock.lock().await;

        let completed_hosts = self
            .repository
            .count_host_executions(&self.task_id, &HostExecutionStatus::FINISHED)
            .await?;
        let failed_hosts = self
            .repository
            .count_host_executions(&self.task_id, &[HostExecutionStatus::Failed])
            .await?;

        self.repository
            .update_task_counters(&self.task_id, completed_hosts, failed_hosts)
            .await?;

        debug!(
            task_id = %self.task_id,
            completed_hosts,
            failed_hosts,
            "Progress updated"
        );
        Ok(ProgressSnapshot {
            completed_hosts,
            failed_hosts,
        })
    }

    /// Close out the task once every dispatched unit of work has returned.
    ///
    /// Returns the task's stored status afterwards, which stays `Cancelled` if
    /// a cancellation won the race.
    pub async fn finalize(
        &self,
        task: &Task,
        any_host_failed: bool,
    ) -> Result<TaskStatus, RepositoryError> {
        let snapshot = self.update_progress().await?;

        let mut finished = task.clone();
        finished.completed_at = Some(Utc::now());
        finished.status = if any_host_failed {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };

        if self
            .repository
            .transition_task(&finished, &[TaskStatus::Running])
            .await?
        {
            info!(
                task_id = %task.id,
                status = %finished.status,
                completed_hosts = snapshot.completed_hosts,
                failed_hosts = snapshot.failed_hosts,
                "Task finalized"
            );
            return Ok(finished.status);
        }

        let current = self.repository.load_task(&task.id).await?;
        info!(
            task_id = %task.id,
            status = %current.status,
            "Task left its running state before finalization; keeping stored status"
        );

        if current.status == TaskStatus::Cancelled {
            // Records created after the cancellation sweep are still open
            let reaped = self
                .repository
                .bulk_update_host_executions(
                    &task.id,
                    &HostExecutionStatus::ACTIVE,
                    HostExecutionStatus::Cancelled,
                    current.completed_at.unwrap_or_else(Utc::now),
                )
                .await?;
            if reaped > 0 {
                info!(task_id = %task.id, reaped, "Cancelled host records left open");
            }
        }
        Ok(current.status)
    }
}
