use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::repository::{RepositoryError, TaskRepository};
use crate::task::{HostExecution, HostExecutionStatus, Task, TaskStatus};

/// Host records of one task, kept in creation order
#[derive(Default)]
struct HostTable {
    records: Vec<HostExecution>,
    index: HashMap<String, usize>,
}

/// In-memory task storage
#[derive(Clone, Default)]
pub struct InMemoryTaskRepository {
    tasks: Arc<DashMap<String, Task>>,
    hosts: Arc<RwLock<HashMap<String, HostTable>>>,
}

impl InMemoryTaskRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn load_task(&self, task_id: &str) -> Result<Task, RepositoryError> {
        self.tasks
            .get(task_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RepositoryError::NotFound(format!("task {}", task_id)))
    }

    async fn save_task(&self, task: &Task) -> Result<(), RepositoryError> {
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn transition_task(
        &self,
        task: &Task,
        from: &[TaskStatus],
    ) -> Result<bool, RepositoryError> {
        // The entry guard holds the shard lock across the check and the write
        let mut entry = self
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {}", task.id)))?;

        if !from.contains(&entry.status) {
            return Ok(false);
        }
        entry.status = task.status;
        entry.total_hosts = task.total_hosts;
        entry.started_at = task.started_at;
        entry.completed_at = task.completed_at;
        Ok(true)
    }

    async fn update_task_counters(
        &self,
        task_id: &str,
        completed_hosts: usize,
        failed_hosts: usize,
    ) -> Result<(), RepositoryError> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {}", task_id)))?;
        entry.completed_hosts = completed_hosts;
        entry.failed_hosts = failed_hosts;
        Ok(())
    }

    async fn create_host_executions(
        &self,
        records: &[HostExecution],
    ) -> Result<(), RepositoryError> {
        let mut hosts = self.hosts.write();

        // Validate the whole batch before inserting anything
        let mut seen = std::collections::HashSet::new();
        for record in records {
            let key = (record.task_id.as_str(), record.host_id.as_str());
            let exists = hosts
                .get(&record.task_id)
                .map(|table| table.index.contains_key(&record.host_id))
                .unwrap_or(false);
            if exists || !seen.insert(key) {
                return Err(RepositoryError::DuplicateKey(format!(
                    "host execution {}/{}",
                    record.task_id, record.host_id
                )));
            }
        }

        for record in records {
            let table = hosts.entry(record.task_id.clone()).or_default();
            table.index.insert(record.host_id.clone(), table.records.len());
            table.records.push(record.clone());
        }
        Ok(())
    }

    async fn load_host_execution(
        &self,
        task_id: &str,
        host_id: &str,
    ) -> Result<HostExecution, RepositoryError> {
        let hosts = self.hosts.read();
        hosts
            .get(task_id)
            .and_then(|table| table.index.get(host_id).map(|&i| table.records[i].clone()))
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("host execution {}/{}", task_id, host_id))
            })
    }

    async fn save_host_execution(
        &self,
        record: &HostExecution,
        expected: &[HostExecutionStatus],
    ) -> Result<bool, RepositoryError> {
        let mut hosts = self.hosts.write();
        let table = hosts.get_mut(&record.task_id);
        let slot = table.and_then(|table| {
            let i = *table.index.get(&record.host_id)?;
            table.records.get_mut(i)
        });

        match slot {
            Some(stored) if expected.contains(&stored.status) => {
                *stored = record.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(format!(
                "host execution {}/{}",
                record.task_id, record.host_id
            ))),
        }
    }

    async fn list_host_executions(
        &self,
        task_id: &str,
    ) -> Result<Vec<HostExecution>, RepositoryError> {
        Ok(self
            .hosts
            .read()
            .get(task_id)
            .map(|table| table.records.clone())
            .unwrap_or_default())
    }

    async fn count_host_executions(
        &self,
        task_id: &str,
        statuses: &[HostExecutionStatus],
    ) -> Result<usize, RepositoryError> {
        Ok(self
            .hosts
            .read()
            .get(task_id)
            .map(|table| {
                table
                    .records
                    .iter()
                    .filter(|r| statuses.contains(&r.status))
                    .count()
            })
            .unwrap_or(0))
    }

    async fn bulk_update_host_executions(
        &self,
        task_id: &str,
        statuses: &[HostExecutionStatus],
        new_status: HostExecutionStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let mut hosts = self.hosts.write();
        let Some(table) = hosts.get_mut(task_id) else {
            return Ok(0);
        };

        let mut changed = 0;
        for record in table.records.iter_mut().filter(|r| statuses.contains(&r.status)) {
            record.status = new_status;
            record.completed_at = Some(completed_at);
            changed += 1;
        }
        Ok(changed)
    }
}
