//! Strategy dispatch: parallel fan-out, serial walk, rolling waves

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::engine::host_executor::HostExecutor;
use crate::task::{Strategy, Task, TaskStatus};

/// Width of each rolling wave: `parallelism` clamped to `1..=host_count`
pub fn rolling_wave_width(parallelism: usize, host_count: usize) -> usize {
    parallelism.clamp(1, host_count.max(1))
}

/// Drives the host executor over a task's host set
pub struct Dispatcher {
    executor: HostExecutor,
}

impl Dispatcher {
    /// Create a dispatcher around `executor`
    pub fn new(executor: HostExecutor) -> Self {
        Self { executor }
    }

    /// Run every host under `strategy` and return how many hosts failed
    pub async fn dispatch(&self, strategy: Strategy, task: Arc<Task>, hosts: &[String]) -> usize {
        let failures = Arc::new(AtomicUsize::new(0));

        match strategy {
            Strategy::Parallel => self.run_wave(&task, hosts, &failures).await,
            Strategy::Serial => self.run_serial(&task, hosts, &failures).await,
            Strategy::Rolling => self.run_rolling(&task, hosts, &failures).await,
        }

        failures.load(Ordering::SeqCst)
    }

    /// Launch one unit of work per host and join them all
    async fn run_wave(&self, task: &Arc<Task>, hosts: &[String], failures: &Arc<AtomicUsize>) {
        let mut handles = Vec::with_capacity(hosts.len());

        for host_id in hosts {
            let executor = self.executor.clone();
            let task = Arc::clone(task);
            let host_id = host_id.clone();
            let failures = Arc::clone(failures);

            handles.push(tokio::spawn(async move {
                if executor.run_on_host(&task, &host_id).await.is_failure() {
                    failures.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        let results = join_all(handles).await;
        for (result, host_id) in results.into_iter().zip(hosts) {
            if let Err(e) = result {
                error!(task_id = %task.id, host_id = %host_id, "Host unit of work join error: {}", e);
                failures.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    async fn run_serial(&self, task: &Arc<Task>, hosts: &[String], failures: &Arc<AtomicUsize>) {
        for (position, host_id) in hosts.iter().enumerate() {
            if self.is_cancelled(task).await {
                info!(
                    task_id = %task.id,
                    remaining = hosts.len() - position,
                    "Task cancelled; serial dispatch stopped"
                );
                return;
            }

            if self.executor.run_on_host(task, host_id).await.is_failure() {
                failures.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    async fn run_rolling(&self, task: &Arc<Task>, hosts: &[String], failures: &Arc<AtomicUsize>) {
        let width = rolling_wave_width(task.parallelism, hosts.len());
        let wave_count = hosts.len().div_ceil(width);

        for (wave, batch) in hosts.chunks(width).enumerate() {
            if self.is_cancelled(task).await {
                info!(task_id = %task.id, wave, wave_count, "Task cancelled; remaining waves skipped");
                return;
            }

            debug!(task_id = %task.id, wave, wave_count, size = batch.len(), "Starting wave");
            self.run_wave(task, batch, failures).await;
        }
    }

    async fn is_cancelled(&self, task: &Task) -> bool {
        match self.executor.repository.load_task(&task.id).await {
            Ok(current) => current.status == TaskStatus::Cancelled,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Could not check for cancellation");
                false
            }
        }
    }
}
