//! Lifecycle events emitted while a task runs.
//!
//! Handlers are awaited in registration order on the emitting unit of work, so
//! a slow handler delays that host's progress but never a sibling's.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::task::{HostExecutionStatus, Strategy, TaskStatus};

/// Lifecycle events emitted during execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// The task moved to running and its host records exist.
    TaskStarted {
        /// Task id
        task_id: String,
        /// Dispatch strategy
        strategy: Strategy,
        /// Distinct hosts dispatched
        total_hosts: usize,
        /// When it happened
        timestamp: DateTime<Utc>,
    },

    /// A host record moved to running.
    HostStarted {
        /// Task id
        task_id: String,
        /// Host id
        host_id: String,
        /// When it happened
        timestamp: DateTime<Utc>,
    },

    /// A host unit of work returned and task progress was recomputed.
    ///
    /// `status` is the record's status after the unit returned, which is
    /// `Cancelled` when its terminal write lost to a cancellation.
    HostFinished {
        /// Task id
        task_id: String,
        /// Host id
        host_id: String,
        /// Record status after the unit returned
        status: HostExecutionStatus,
        /// Task's finished-host count after this host
        completed_hosts: usize,
        /// Distinct hosts dispatched
        total_hosts: usize,
        /// When it happened
        timestamp: DateTime<Utc>,
    },

    /// Finalization ran; `status` is the task's stored status afterwards.
    TaskFinished {
        /// Task id
        task_id: String,
        /// Stored status after finalization
        status: TaskStatus,
        /// When it happened
        timestamp: DateTime<Utc>,
    },

    /// The task was cancelled and its open host records were reaped.
    TaskCancelled {
        /// Task id
        task_id: String,
        /// Host records moved to cancelled
        cancelled_hosts: usize,
        /// When it happened
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    /// Task the event belongs to.
    pub fn task_id(&self) -> &str {
        match self {
            ExecutionEvent::TaskStarted { task_id, .. }
            | ExecutionEvent::HostStarted { task_id, .. }
            | ExecutionEvent::HostFinished { task_id, .. }
            | ExecutionEvent::TaskFinished { task_id, .. }
            | ExecutionEvent::TaskCancelled { task_id, .. } => task_id,
        }
    }

    /// When the event was produced.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ExecutionEvent::TaskStarted { timestamp, .. }
            | ExecutionEvent::HostStarted { timestamp, .. }
            | ExecutionEvent::HostFinished { timestamp, .. }
            | ExecutionEvent::TaskFinished { timestamp, .. }
            | ExecutionEvent::TaskCancelled { timestamp, .. } => *timestamp,
        }
    }
}

/// Receives lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event
    async fn handle(&self, event: &ExecutionEvent);
}

/// Ordered set of handlers shared by every unit of work of an engine.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a bus delivering to `handlers` in order
    pub fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }

    /// Return a bus with `handler` appended.
    pub fn with_handler(&self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers: Vec<_> = self.handlers.iter().cloned().collect();
        handlers.push(handler);
        Self::new(handlers)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Deliver `event` to every handler in order.
    pub async fn emit(&self, event: ExecutionEvent) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }
}
