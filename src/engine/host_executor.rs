//! Per-host unit of work

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{truncate_output, EngineConfig};
use crate::engine::metrics::MetricsCollector;
use crate::engine::progress::ProgressTracker;
use crate::events::{EventBus, ExecutionEvent};
use crate::remote::{HostResolver, RemoteCommandClient, RemoteError};
use crate::repository::{RepositoryError, TaskRepository};
use crate::task::{HostExecution, HostExecutionStatus, Task};

/// How one host's unit of work ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOutcome {
    /// The command returned and its result was recorded
    Completed,
    /// A resolution, transport or execution error was recorded on the host
    Failed,
    /// The record was cancelled before our write landed; nothing was written
    Superseded,
    /// The record could not be read or written at all
    Aborted,
}

impl HostOutcome {
    /// Whether this outcome makes the task fail
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Aborted)
    }

    /// Status label for host metrics; `None` when no result was persisted
    pub fn metric_status(&self) -> Option<&'static str> {
        match self {
            Self::Completed => Some(HostExecutionStatus::Completed.as_str()),
            Self::Failed => Some(HostExecutionStatus::Failed.as_str()),
            Self::Superseded | Self::Aborted => None,
        }
    }

    fn record_status(&self) -> Option<HostExecutionStatus> {
        match self {
            Self::Completed => Some(HostExecutionStatus::Completed),
            Self::Failed => Some(HostExecutionStatus::Failed),
            Self::Superseded => Some(HostExecutionStatus::Cancelled),
            Self::Aborted => None,
        }
    }
}

/// Runs a task's command on single hosts; cheap to clone into spawned units
#[derive(Clone)]
pub struct HostExecutor {
    pub(crate) repository: Arc<dyn TaskRepository>,
    pub(crate) resolver: Arc<dyn HostResolver>,
    pub(crate) client: Arc<dyn RemoteCommandClient>,
    pub(crate) tracker: Arc<ProgressTracker>,
    pub(crate) events: EventBus,
    pub(crate) metrics: MetricsCollector,
    pub(crate) config: Arc<EngineConfig>,
}

impl HostExecutor {
    /// Run the task on `host_id`, then refresh task progress whatever happened
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn run_on_host(&self, task: &Task, host_id: &str) -> HostOutcome {
        let outcome = self.execute(task, host_id).await;

        match self.tracker.update_progress().await {
            Ok(snapshot) => {
                if let Some(status) = outcome.record_status() {
                    self.events
                        .emit(ExecutionEvent::HostFinished {
                            task_id: task.id.clone(),
                            host_id: host_id.to_string(),
                            status,
                            completed_hosts: snapshot.completed_hosts,
                            total_hosts: task.total_hosts,
                            timestamp: Utc::now(),
                        })
                        .await;
                }
            }
            Err(e) => warn!(host_id, error = %e, "Failed to update task progress"),
        }

        outcome
    }

    async fn execute(&self, task: &Task, host_id: &str) -> HostOutcome {
        let resolved = self.resolver.resolve_host(host_id).await;

        let mut record = match self.repository.load_host_execution(&task.id, host_id).await {
            Ok(record) => record,
            Err(RepositoryError::NotFound(_)) => {
                error!(host_id, "Host execution record missing; it should exist before dispatch");
                return HostOutcome::Aborted;
            }
            Err(e) => {
                error!(host_id, error = %e, "Failed to load host execution record");
                return HostOutcome::Aborted;
            }
        };

        let params = match resolved {
            Ok(params) => params,
            Err(e) => {
                warn!(host_id, error = %e, "Could not resolve host");
                record.mark_failed(e.to_string(), Utc::now());
                let outcome = self
                    .write_terminal(&record, HostExecutionStatus::Pending)
                    .await;
                if let Some(status) = outcome.metric_status() {
                    self.metrics.record_host_skipped(status);
                }
                return outcome;
            }
        };

        record.mark_running(Utc::now());
        match self
            .repository
            .save_host_execution(&record, &[HostExecutionStatus::Pending])
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(host_id, "Host record no longer pending; skipping");
                return HostOutcome::Superseded;
            }
            Err(e) => {
                error!(host_id, error = %e, "Failed to mark host running");
                return HostOutcome::Aborted;
            }
        }

        self.events
            .emit(ExecutionEvent::HostStarted {
                task_id: task.id.clone(),
                host_id: host_id.to_string(),
                timestamp: Utc::now(),
            })
            .await;
        self.metrics.record_host_start();

        let deadline = Duration::from_secs(
            task.effective_timeout_secs(self.config.default_timeout_secs),
        );
        let command = task.remote_command();
        let start = Instant::now();

        let result = match tokio::time::timeout(
            deadline,
            self.client.run_command(&params, &command, deadline),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(deadline)),
        };

        let now = Utc::now();
        match result {
            Ok(output) => {
                let limit = self.config.max_output_bytes;
                debug!(host_id, exit_code = output.exit_code, "Command returned");
                record.mark_completed(
                    output.exit_code,
                    truncate_output(output.stdout, limit),
                    truncate_output(output.stderr, limit),
                    now,
                );
            }
            Err(e) => {
                warn!(host_id, error = %e, "Command failed on host");
                record.mark_failed(e.to_string(), now);
            }
        }
        let elapsed = start.elapsed().as_secs_f64();

        let outcome = self
            .write_terminal(&record, HostExecutionStatus::Running)
            .await;
        match outcome.metric_status() {
            Some(status) => self.metrics.record_host_end(status, elapsed),
            None => self.metrics.record_host_discarded(),
        }
        outcome
    }

    /// Persist a terminal record unless cancellation got there first
    async fn write_terminal(
        &self,
        record: &HostExecution,
        expected: HostExecutionStatus,
    ) -> HostOutcome {
        match self.repository.save_host_execution(record, &[expected]).await {
            Ok(true) => {
                info!(
                    host_id = %record.host_id,
                    status = %record.status,
                    duration_ms = ?record.duration_ms,
                    "Host execution finished"
                );
                if record.status == HostExecutionStatus::Completed {
                    HostOutcome::Completed
                } else {
                    HostOutcome::Failed
                }
            }
            Ok(false) => {
                info!(
                    host_id = %record.host_id,
                    status = %record.status,
                    "Host record already terminal; result discarded"
                );
                HostOutcome::Superseded
            }
            Err(e) => {
                error!(host_id = %record.host_id, error = %e, "Failed to persist host result");
                HostOutcome::Aborted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_persisted_outcomes_are_counted() {
        assert_eq!(HostOutcome::Completed.metric_status(), Some("completed"));
        assert_eq!(HostOutcome::Failed.metric_status(), Some("failed"));
        assert_eq!(HostOutcome::Superseded.metric_status(), None);
        assert_eq!(HostOutcome::Aborted.metric_status(), None);
    }

    #[test]
    fn test_failure_outcomes() {
        assert!(HostOutcome::Failed.is_failure());
        assert!(HostOutcome::Aborted.is_failure());
        assert!(!HostOutcome::Completed.is_failure());
        assert!(!HostOutcome::Superseded.is_failure());
    }
}
