//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::DEFAULT_TIMEOUT_SECS;

/// Tunables shared by every task the engine runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-host timeout used when a task does not set a positive one
    pub default_timeout_secs: u64,

    /// Captured stdout/stderr beyond this many bytes is truncated
    pub max_output_bytes: usize,

    /// Record Prometheus metrics for executions
    pub metrics_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_output_bytes: 1024 * 1024,
            metrics_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback per-host timeout
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the captured output limit
    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    /// Enable or disable metrics recording
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }
}

/// Cut `output` to at most `limit` bytes without splitting a UTF-8 character
pub(crate) fn truncate_output(mut output: String, limit: usize) -> String {
    if output.len() <= limit {
        return output;
    }
    let mut cut = limit;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output
}
