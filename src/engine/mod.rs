//! Task execution engine
//!
//! [`BatchEngine`] is the entry point: it validates a task, creates its host
//! records, hands the host set to the strategy dispatcher and finalizes the
//! task once every unit of work has returned. It also serves cancellation and
//! progress queries.
//!
//! The engine keeps no state between calls; everything it knows about a task
//! is read from and written to the [`TaskRepository`].

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

pub mod dispatcher;
pub mod host_executor;
pub mod metrics;
pub mod progress;

pub use dispatcher::{rolling_wave_width, Dispatcher};
pub use host_executor::{HostExecutor, HostOutcome};
pub use metrics::{export_metrics, MetricsCollector};
pub use progress::{ProgressSnapshot, ProgressTracker};

use crate::config::EngineConfig;
use crate::events::{EventBus, EventHandler, ExecutionEvent};
use crate::remote::{HostResolver, RemoteCommandClient};
use crate::repository::{RepositoryError, TaskRepository};
use crate::task::{HostExecution, HostExecutionStatus, Task, TaskProgressView, TaskStatus};
use crate::{EngineError, Result};

/// Runs tasks across host sets
pub struct BatchEngine {
    repository: Arc<dyn TaskRepository>,
    resolver: Arc<dyn HostResolver>,
    client: Arc<dyn RemoteCommandClient>,
    config: Arc<EngineConfig>,
    events: EventBus,
    metrics: MetricsCollector,
}

impl BatchEngine {
    /// Create an engine over its three collaborators with default settings
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        resolver: Arc<dyn HostResolver>,
        client: Arc<dyn RemoteCommandClient>,
    ) -> Self {
        let config = EngineConfig::default();
        Self {
            repository,
            resolver,
            client,
            metrics: MetricsCollector::new(config.metrics_enabled),
            config: Arc::new(config),
            events: EventBus::default(),
        }
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.metrics = MetricsCollector::new(config.metrics_enabled);
        self.config = Arc::new(config);
        self
    }

    /// Register a lifecycle event handler
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = self.events.with_handler(handler);
        self
    }

    /// Current configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute a pending task against `host_ids` and wait for it to finish.
    ///
    /// Returns the task's stored status after finalization. Per-host failures
    /// are recorded on the host records and reflected in that status; they are
    /// never returned as errors.
    #[instrument(skip(self, host_ids))]
    pub async fn execute_task<I, S>(&self, task_id: &str, host_ids: I) -> Result<TaskStatus>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut task = self.load_task(task_id).await?;

        let strategy = task
            .parsed_strategy()
            .map_err(EngineError::UnknownStrategy)?;
        if task.status != TaskStatus::Pending {
            return Err(EngineError::InvalidState {
                task_id: task.id,
                status: task.status,
                operation: "execute",
            });
        }

        let hosts = dedup_hosts(task_id, host_ids);

        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        task.total_hosts = hosts.len();
        if !self
            .repository
            .transition_task(&task, &[TaskStatus::Pending])
            .await?
        {
            let current = self.load_task(task_id).await?;
            return Err(EngineError::InvalidState {
                task_id: current.id,
                status: current.status,
                operation: "execute",
            });
        }

        let records: Vec<HostExecution> = hosts
            .iter()
            .map(|host_id| HostExecution::pending(task.id.clone(), host_id.clone()))
            .collect();
        if let Err(e) = self.repository.create_host_executions(&records).await {
            error!(task_id, error = %e, "Failed to create host records; failing task");
            self.abandon(&task).await;
            return Err(e.into());
        }

        info!(
            task_id,
            strategy = %strategy,
            total_hosts = hosts.len(),
            parallelism = task.parallelism,
            "Task started"
        );
        self.events
            .emit(ExecutionEvent::TaskStarted {
                task_id: task.id.clone(),
                strategy,
                total_hosts: hosts.len(),
                timestamp: Utc::now(),
            })
            .await;

        let tracker = Arc::new(ProgressTracker::new(
            Arc::clone(&self.repository),
            task.id.clone(),
        ));
        let dispatcher = Dispatcher::new(HostExecutor {
            repository: Arc::clone(&self.repository),
            resolver: Arc::clone(&self.resolver),
            client: Arc::clone(&self.client),
            tracker: Arc::clone(&tracker),
            events: self.events.clone(),
            metrics: self.metrics,
            config: Arc::clone(&self.config),
        });

        // A cancel between the running transition and record creation swept nothing
        let task = Arc::new(task);
        let failed = if self.load_task(task_id).await?.status == TaskStatus::Cancelled {
            info!(task_id, "Task cancelled before dispatch; no host will be contacted");
            0
        } else {
            dispatcher.dispatch(strategy, Arc::clone(&task), &hosts).await
        };

        let status = tracker.finalize(&task, failed > 0).await?;
        if status != TaskStatus::Cancelled {
            self.metrics
                .record_task_finished(strategy.as_str(), status.as_str());
        }
        self.events
            .emit(ExecutionEvent::TaskFinished {
                task_id: task.id.clone(),
                status,
                timestamp: Utc::now(),
            })
            .await;

        Ok(status)
    }

    /// Cancel a pending or running task.
    ///
    /// Returns how many host records were moved to cancelled. In-flight remote
    /// commands are not interrupted; their results are discarded when they
    /// return.
    #[instrument(skip(self))]
    pub async fn cancel_task(&self, task_id: &str) -> Result<usize> {
        let mut task = self.load_task(task_id).await?;
        if task.status.is_terminal() {
            return Err(EngineError::InvalidState {
                task_id: task.id,
                status: task.status,
                operation: "cancel",
            });
        }

        let now = Utc::now();
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(now);
        if !self
            .repository
            .transition_task(&task, &[TaskStatus::Pending, TaskStatus::Running])
            .await?
        {
            let current = self.load_task(task_id).await?;
            return Err(EngineError::InvalidState {
                task_id: current.id,
                status: current.status,
                operation: "cancel",
            });
        }

        let cancelled_hosts = self
            .repository
            .bulk_update_host_executions(
                task_id,
                &HostExecutionStatus::ACTIVE,
                HostExecutionStatus::Cancelled,
                now,
            )
            .await?;

        info!(task_id, cancelled_hosts, "Task cancelled");
        self.metrics
            .record_task_finished(task.strategy.as_str(), TaskStatus::Cancelled.as_str());
        self.events
            .emit(ExecutionEvent::TaskCancelled {
                task_id: task.id.clone(),
                cancelled_hosts,
                timestamp: now,
            })
            .await;

        Ok(cancelled_hosts)
    }

    /// Snapshot of a task, its host records and its completion percentage
    pub async fn get_task_progress(&self, task_id: &str) -> Result<TaskProgressView> {
        let task = self.load_task(task_id).await?;
        let host_executions = self.repository.list_host_executions(task_id).await?;
        let progress_percent = task.progress_percent();

        Ok(TaskProgressView {
            task,
            host_executions,
            progress_percent,
        })
    }

    async fn load_task(&self, task_id: &str) -> Result<Task> {
        match self.repository.load_task(task_id).await {
            Ok(task) => Ok(task),
            Err(RepositoryError::NotFound(_)) => Err(EngineError::TaskNotFound(task_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Fail a task whose host records could not be created
    async fn abandon(&self, task: &Task) {
        let mut failed = task.clone();
        failed.status = TaskStatus::Failed;
        failed.completed_at = Some(Utc::now());
        if let Err(e) = self
            .repository
            .transition_task(&failed, &[TaskStatus::Running])
            .await
        {
            error!(task_id = %task.id, error = %e, "Failed to mark abandoned task as failed");
        }
    }
}

/// Drop repeated host ids, keeping first occurrences in order
fn dedup_hosts<I, S>(task_id: &str, host_ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut hosts = Vec::new();
    for host_id in host_ids.into_iter().map(Into::into) {
        if seen.insert(host_id.clone()) {
            hosts.push(host_id);
        } else {
            warn!(task_id, host_id = %host_id, "Duplicate host id ignored");
        }
    }
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_hosts_keeps_first_occurrence() {
        let hosts = dedup_hosts("t1", ["b", "a", "b", "c", "a"]);
        assert_eq!(hosts, vec!["b", "a", "c"]);
    }
}
