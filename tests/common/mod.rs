//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_exec::events::{EventHandler, ExecutionEvent};
use fleet_exec::remote::{
    CommandOutput, ConnectionParams, Credentials, RemoteCommandClient, RemoteError,
    StaticHostResolver,
};
use fleet_exec::repository::{InMemoryTaskRepository, RepositoryError, TaskRepository};
use fleet_exec::task::{HostExecution, HostExecutionStatus, Task, TaskStatus};
use fleet_exec::{BatchEngine, EngineConfig};
use parking_lot::Mutex;

/// What the scripted client does for one host address.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub delay: Duration,
    pub result: Result<CommandOutput, RemoteError>,
}

/// One finished call to the scripted client.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub host: String,
    pub command: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Remote client whose per-host results are scripted up front.
///
/// Hosts without a script succeed with exit code 0 after `default_delay`.
/// Tracks the peak number of commands in flight at once.
pub struct ScriptedClient {
    default_delay: Duration,
    behaviors: Mutex<HashMap<String, Behavior>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<CallRecord>>,
}

impl ScriptedClient {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            default_delay,
            behaviors: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_behavior(self, host: &str, behavior: Behavior) -> Self {
        self.behaviors.lock().insert(host.to_string(), behavior);
        self
    }

    pub fn with_error(self, host: &str, error: RemoteError) -> Self {
        let delay = self.default_delay;
        self.with_behavior(
            host,
            Behavior {
                delay,
                result: Err(error),
            },
        )
    }

    pub fn with_exit_code(self, host: &str, exit_code: i32) -> Self {
        let delay = self.default_delay;
        self.with_behavior(
            host,
            Behavior {
                delay,
                result: Ok(CommandOutput {
                    exit_code,
                    stdout: String::new(),
                    stderr: format!("exit {}", exit_code),
                }),
            },
        )
    }

    /// Highest number of concurrent calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Finished calls in start order.
    pub fn calls(&self) -> Vec<CallRecord> {
        let mut calls = self.calls.lock().clone();
        calls.sort_by_key(|c| c.started);
        calls
    }

    pub fn call_for(&self, host: &str) -> Option<CallRecord> {
        self.calls.lock().iter().find(|c| c.host == host).cloned()
    }
}

#[async_trait]
impl RemoteCommandClient for ScriptedClient {
    async fn run_command(
        &self,
        params: &ConnectionParams,
        command: &str,
        _deadline: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        let started = Instant::now();
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_in_flight, Ordering::SeqCst);

        let behavior = self.behaviors.lock().get(&params.address).cloned();
        let behavior = behavior.unwrap_or_else(|| Behavior {
            delay: self.default_delay,
            result: Ok(CommandOutput {
                exit_code: 0,
                stdout: format!("ok from {}", params.address),
                stderr: String::new(),
            }),
        });

        tokio::time::sleep(behavior.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().push(CallRecord {
            host: params.address.clone(),
            command: command.to_string(),
            started,
            finished: Instant::now(),
        });
        behavior.result
    }
}

/// Host ids `host-1` ..= `host-n`.
pub fn host_ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("host-{}", i)).collect()
}

/// Resolver that maps each host id to an address equal to the id.
pub fn resolver_for(hosts: &[String]) -> StaticHostResolver {
    let resolver = StaticHostResolver::new();
    for host in hosts {
        resolver.insert(
            host.clone(),
            ConnectionParams {
                address: host.clone(),
                port: 22,
                credentials: Credentials::Password {
                    username: "deploy".to_string(),
                    password: "secret".to_string(),
                },
            },
        );
    }
    resolver
}

/// Engine wired to in-memory collaborators, with handles to each of them.
pub struct Harness {
    pub repository: Arc<InMemoryTaskRepository>,
    pub resolver: Arc<StaticHostResolver>,
    pub client: Arc<ScriptedClient>,
}

impl Harness {
    pub fn new(hosts: &[String], client: ScriptedClient) -> Self {
        Self {
            repository: Arc::new(InMemoryTaskRepository::new()),
            resolver: Arc::new(resolver_for(hosts)),
            client: Arc::new(client),
        }
    }

    pub fn engine(&self) -> BatchEngine {
        self.engine_over(self.repository.clone())
    }

    /// Engine using `repository` in place of the harness's own
    pub fn engine_over(&self, repository: Arc<dyn TaskRepository>) -> BatchEngine {
        BatchEngine::new(repository, self.resolver.clone(), self.client.clone())
            .with_config(EngineConfig::default().with_metrics(false))
    }

    /// Fault-injecting wrapper sharing the harness's storage
    pub fn faulty_repository(&self) -> FaultyRepository {
        FaultyRepository::new(self.repository.clone())
    }

    pub async fn save(&self, task: &Task) {
        self.repository.save_task(task).await.unwrap();
    }

    pub async fn count(&self, task_id: &str, status: HostExecutionStatus) -> usize {
        self.repository
            .count_host_executions(task_id, &[status])
            .await
            .unwrap()
    }
}

/// Repository that delegates to an in-memory one but can inject faults.
pub struct FaultyRepository {
    inner: Arc<InMemoryTaskRepository>,
    fail_create: AtomicBool,
    missing_host: Mutex<Option<String>>,
    cancel_before_create: Mutex<Option<BatchEngine>>,
    swept_before_create: Mutex<Option<usize>>,
}

impl FaultyRepository {
    pub fn new(inner: Arc<InMemoryTaskRepository>) -> Self {
        Self {
            inner,
            fail_create: AtomicBool::new(false),
            missing_host: Mutex::new(None),
            cancel_before_create: Mutex::new(None),
            swept_before_create: Mutex::new(None),
        }
    }

    /// Reject every batch of host records
    pub fn failing_create(self) -> Self {
        self.fail_create.store(true, Ordering::SeqCst);
        self
    }

    /// Report this host's record as missing when it is loaded
    pub fn hiding_host(self, host_id: &str) -> Self {
        *self.missing_host.lock() = Some(host_id.to_string());
        self
    }

    /// Cancel the task through `engine` right before its host records are inserted
    pub fn cancelling_before_create(self, engine: BatchEngine) -> Self {
        *self.cancel_before_create.lock() = Some(engine);
        self
    }

    /// Host records the early cancellation moved to cancelled, once it ran
    pub fn swept_before_create(&self) -> Option<usize> {
        *self.swept_before_create.lock()
    }
}

#[async_trait]
impl TaskRepository for FaultyRepository {
    async fn load_task(&self, task_id: &str) -> Result<Task, RepositoryError> {
        self.inner.load_task(task_id).await
    }

    async fn save_task(&self, task: &Task) -> Result<(), RepositoryError> {
        self.inner.save_task(task).await
    }

    async fn transition_task(
        &self,
        task: &Task,
        from: &[TaskStatus],
    ) -> Result<bool, RepositoryError> {
        self.inner.transition_task(task, from).await
    }

    async fn update_task_counters(
        &self,
        task_id: &str,
        completed_hosts: usize,
        failed_hosts: usize,
    ) -> Result<(), RepositoryError> {
        self.inner
            .update_task_counters(task_id, completed_hosts, failed_hosts)
            .await
    }

    async fn create_host_executions(
        &self,
        records: &[HostExecution],
    ) -> Result<(), RepositoryError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RepositoryError::DuplicateKey("injected".to_string()));
        }

        let canceller = self.cancel_before_create.lock().take();
        if let (Some(engine), Some(first)) = (canceller, records.first()) {
            let swept = engine.cancel_task(&first.task_id).await.unwrap();
            *self.swept_before_create.lock() = Some(swept);
        }
        self.inner.create_host_executions(records).await
    }

    async fn load_host_execution(
        &self,
        task_id: &str,
        host_id: &str,
    ) -> Result<HostExecution, RepositoryError> {
        let hidden = self.missing_host.lock().as_deref() == Some(host_id);
        if hidden {
            return Err(RepositoryError::NotFound(format!(
                "host execution {}/{}",
                task_id, host_id
            )));
        }
        self.inner.load_host_execution(task_id, host_id).await
    }

    async fn save_host_execution(
        &self,
        record: &HostExecution,
        expected: &[HostExecutionStatus],
    ) -> Result<bool, RepositoryError> {
        self.inner.save_host_execution(record, expected).await
    }

    async fn list_host_executions(
        &self,
        task_id: &str,
    ) -> Result<Vec<HostExecution>, RepositoryError> {
        self.inner.list_host_executions(task_id).await
    }

    async fn count_host_executions(
        &self,
        task_id: &str,
        statuses: &[HostExecutionStatus],
    ) -> Result<usize, RepositoryError> {
        self.inner.count_host_executions(task_id, statuses).await
    }

    async fn bulk_update_host_executions(
        &self,
        task_id: &str,
        statuses: &[HostExecutionStatus],
        new_status: HostExecutionStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        self.inner
            .bulk_update_host_executions(task_id, statuses, new_status, completed_at)
            .await
    }
}

/// Collects every event it receives.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl EventRecorder {
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventHandler for EventRecorder {
    async fn handle(&self, event: &ExecutionEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Cancels the task once `after` hosts have finished.
pub struct CancelAfter {
    engine: BatchEngine,
    after: usize,
    fired: AtomicBool,
    cancelled_hosts: AtomicUsize,
}

impl CancelAfter {
    pub fn new(engine: BatchEngine, after: usize) -> Self {
        Self {
            engine,
            after,
            fired: AtomicBool::new(false),
            cancelled_hosts: AtomicUsize::new(0),
        }
    }

    pub fn cancelled_hosts(&self) -> Option<usize> {
        self.fired
            .load(Ordering::SeqCst)
            .then(|| self.cancelled_hosts.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl EventHandler for CancelAfter {
    async fn handle(&self, event: &ExecutionEvent) {
        if let ExecutionEvent::HostFinished {
            task_id,
            completed_hosts,
            ..
        } = event
        {
            if *completed_hosts >= self.after && !self.fired.swap(true, Ordering::SeqCst) {
                let n = self.engine.cancel_task(task_id).await.unwrap();
                self.cancelled_hosts.store(n, Ordering::SeqCst);
            }
        }
    }
}

/// Poll until `count` host records of the task hold `status`.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_host_status(
    repository: &dyn TaskRepository,
    task_id: &str,
    status: HostExecutionStatus,
    count: usize,
    timeout: Duration,
) {
    let start = tokio::time::Instant::now();
    loop {
        let current = repository
            .count_host_executions(task_id, &[status])
            .await
            .unwrap();
        if current >= count {
            return;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for {} hosts of task {} to reach {:?}, saw {}",
                count, task_id, status, current
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
