//! Task and per-host execution records
//!
//! A [`Task`] describes one command to run across a host set; each target host
//! gets a [`HostExecution`] record that tracks its own lifecycle independently
//! of its siblings.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default per-host timeout applied when a task's timeout is unset or non-positive
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// What a task runs on each host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// A single shell command line
    Command,
    /// A multi-line script body, run through `sh -c`
    Script,
    /// A pre-rendered file operation command (copy, chmod, ...)
    FileOperation,
}

impl TaskKind {
    /// Stable storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Script => "script",
            Self::FileOperation => "file_operation",
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "command" => Ok(Self::Command),
            "script" => Ok(Self::Script),
            "file_operation" => Ok(Self::FileOperation),
            other => Err(format!("unknown task kind: {}", other)),
        }
    }
}

/// Concurrency policy for spreading a task across its hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Every host at once, no concurrency bound
    Parallel,
    /// One host at a time, in input order
    Serial,
    /// Consecutive waves of `parallelism` hosts
    Rolling,
}

impl Strategy {
    /// Stable storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Serial => "serial",
            Self::Rolling => "rolling",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parallel" => Ok(Self::Parallel),
            "serial" => Ok(Self::Serial),
            "rolling" => Ok(Self::Rolling),
            _ => Err(s.to_string()),
        }
    }
}

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet executed
    Pending,
    /// Hosts are being dispatched
    Running,
    /// Every host finished without a transport or execution error
    Completed,
    /// At least one host failed
    Failed,
    /// Cancelled by request
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transition can happen from this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Stable storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Lifecycle status of one host's execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostExecutionStatus {
    /// Created, not yet dispatched
    Pending,
    /// Command sent to the host
    Running,
    /// Command returned; any exit code
    Completed,
    /// Host could not be reached or the command errored
    Failed,
    /// Swept by a task cancellation
    Cancelled,
}

impl HostExecutionStatus {
    /// Statuses that count toward task progress
    pub const FINISHED: [HostExecutionStatus; 2] = [Self::Completed, Self::Failed];

    /// Statuses the cancellation sweep reaps
    pub const ACTIVE: [HostExecutionStatus; 2] = [Self::Pending, Self::Running];

    /// Whether no further transition can happen from this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Stable storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for HostExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown host execution status: {}", other)),
        }
    }
}

/// A command to run across a set of hosts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: String,
    /// What kind of payload `command` holds
    pub kind: TaskKind,
    /// Command line or script body
    pub command: String,
    /// Per-host timeout in seconds; `<= 0` selects the engine default
    pub timeout_secs: i64,
    /// Reserved for a future retry policy, never acted on
    pub max_retries: u32,
    /// Concurrency width; 0 means unbounded for parallel, 1 for rolling
    pub parallelism: usize,
    /// Raw strategy name as persisted; parsed at dispatch time
    pub strategy: String,
    /// Number of distinct hosts the task was dispatched to
    pub total_hosts: usize,
    /// Hosts that finished running, successfully or not
    pub completed_hosts: usize,
    /// Subset of `completed_hosts` that failed
    pub failed_hosts: usize,
    /// Lifecycle status
    pub status: TaskStatus,
    /// When execution began
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task with a fresh id
    pub fn new(kind: TaskKind, command: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            command: command.into(),
            timeout_secs: 0,
            max_retries: 0,
            parallelism: 0,
            strategy: strategy.as_str().to_string(),
            total_hosts: 0,
            completed_hosts: 0,
            failed_hosts: 0,
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
        }
    }

    /// Use a caller-chosen id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the per-host timeout in seconds
    pub fn with_timeout_secs(mut self, secs: i64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the concurrency width
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set the reserved retry budget
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Store a raw strategy name, which may not be recognized
    pub fn with_raw_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    /// Parse the persisted strategy name
    pub fn parsed_strategy(&self) -> Result<Strategy, String> {
        self.strategy.parse()
    }

    /// Per-host timeout, falling back to `default_secs` when unset
    pub fn effective_timeout_secs(&self, default_secs: u64) -> u64 {
        if self.timeout_secs <= 0 {
            default_secs
        } else {
            self.timeout_secs as u64
        }
    }

    /// Command line sent to each host
    pub fn remote_command(&self) -> String {
        match self.kind {
            TaskKind::Command | TaskKind::FileOperation => self.command.clone(),
            TaskKind::Script => format!("sh -c {}", shell_quote(&self.command)),
        }
    }

    /// Percentage of hosts in a finished state
    pub fn progress_percent(&self) -> f64 {
        if self.total_hosts == 0 {
            0.0
        } else {
            self.completed_hosts as f64 / self.total_hosts as f64 * 100.0
        }
    }
}

/// Single-quote `s` for a POSIX shell
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// The record of one task's run against one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostExecution {
    /// Owning task
    pub task_id: String,
    /// Target host
    pub host_id: String,
    /// Lifecycle status
    pub status: HostExecutionStatus,
    /// Absent until the command returns
    pub exit_code: Option<i32>,
    /// Captured standard output, possibly truncated
    pub stdout: String,
    /// Captured standard error, possibly truncated
    pub stderr: String,
    /// Wall-clock duration in milliseconds
    pub duration_ms: Option<i64>,
    /// Populated only on failure
    pub error_message: Option<String>,
    /// Reserved; always 0
    pub retry_count: u32,
    /// When the record moved to running
    pub started_at: Option<DateTime<Utc>>,
    /// When the record reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

impl HostExecution {
    /// Create a pending record for `host_id` under `task_id`
    pub fn pending(task_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            host_id: host_id.into(),
            status: HostExecutionStatus::Pending,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: None,
            error_message: None,
            retry_count: 0,
            started_at: None,
            completed_at: None,
        }
    }

    /// Transition to running
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = HostExecutionStatus::Running;
        self.started_at = Some(now);
    }

    /// Transition to completed with the command's result
    pub fn mark_completed(
        &mut self,
        exit_code: i32,
        stdout: String,
        stderr: String,
        now: DateTime<Utc>,
    ) {
        self.status = HostExecutionStatus::Completed;
        self.exit_code = Some(exit_code);
        self.stdout = stdout;
        self.stderr = stderr;
        self.error_message = None;
        self.finish(now);
    }

    /// Transition to failed with a descriptive error
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = HostExecutionStatus::Failed;
        self.exit_code = None;
        self.error_message = Some(error.into());
        self.finish(now);
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.completed_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0));
    }
}

/// Point-in-time snapshot returned by progress queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgressView {
    /// The stored task
    pub task: Task,
    /// Its host records, in creation order
    pub host_executions: Vec<HostExecution>,
    /// `completed_hosts / total_hosts * 100`, or 0 with no hosts
    pub progress_percent: f64,
}
