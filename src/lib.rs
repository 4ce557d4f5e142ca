//! # fleet-exec
//!
//! Run one command or script across a set of hosts and track every host's
//! outcome.
//!
//! ## Overview
//!
//! A [`task::Task`] names a command, a per-host timeout and a strategy:
//!
//! - **parallel**: every host at once
//! - **serial**: one host at a time, in the order given, stopping early when
//!   the task is cancelled
//! - **rolling**: consecutive waves of `parallelism` hosts, each wave joined
//!   before the next starts
//!
//! Each host gets a [`task::HostExecution`] record that moves from pending to
//! running to a terminal status on its own. A host failing never stops its
//! siblings; the task ends `failed` if any host failed and `completed`
//! otherwise, unless it was cancelled first.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fleet_exec::engine::BatchEngine;
//! use fleet_exec::remote::{RemoteCommandClient, StaticHostResolver};
//! use fleet_exec::repository::{InMemoryTaskRepository, TaskRepository};
//! use fleet_exec::task::{Strategy, Task, TaskKind};
//!
//! # async fn example(client: Arc<dyn RemoteCommandClient>) -> fleet_exec::Result<()> {
//! let repository = Arc::new(InMemoryTaskRepository::new());
//! let resolver = Arc::new(StaticHostResolver::new());
//!
//! let task = Task::new(TaskKind::Command, "uptime", Strategy::Rolling).with_parallelism(2);
//! repository.save_task(&task).await?;
//!
//! let engine = BatchEngine::new(repository, resolver, client);
//! engine.execute_task(&task.id, ["web-1", "web-2", "web-3"]).await?;
//!
//! let progress = engine.get_task_progress(&task.id).await?;
//! println!("{:.0}% done", progress.progress_percent);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`task`]: task and host execution records
//! - [`engine`]: orchestration, strategies, progress and cancellation
//! - [`repository`]: storage contract with in-memory and PostgreSQL backends
//! - [`remote`]: host lookup and command transport contracts
//! - [`events`]: lifecycle event hooks

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

use crate::task::TaskStatus;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned by the engine's public operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// No task with this id exists
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// The task's strategy name is not recognized
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    /// The task's status does not allow the requested operation
    #[error("Invalid state: task {task_id} is {status}, cannot {operation}")]
    InvalidState {
        /// Task the operation targeted
        task_id: String,
        /// Status found in storage
        status: TaskStatus,
        /// Rejected operation, e.g. `execute` or `cancel`
        operation: &'static str,
    },

    /// Storage failure
    #[error("Repository error: {0}")]
    Repository(#[from] repository::RepositoryError),
}

/// Engine configuration
pub mod config;

/// Task orchestration and strategies
pub mod engine;

/// Lifecycle events
pub mod events;

/// Host lookup and command transport contracts
pub mod remote;

/// Task persistence
pub mod repository;

/// Task and host execution records
pub mod task;

/// Logging setup
pub mod telemetry;

pub use config::EngineConfig;
pub use engine::BatchEngine;
