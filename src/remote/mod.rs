//! Contracts for host lookup and remote command transport
//!
//! Connecting to a host and running a command on it belong to collaborators;
//! the engine only depends on [`HostResolver`] and [`RemoteCommandClient`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while resolving a host or running a command on it
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The resolver does not know the host
    #[error("host not found: {0}")]
    HostNotFound(String),

    /// The host could not be reached or authenticated
    #[error("connection failed: {0}")]
    Connection(String),

    /// The command could not be run to completion
    #[error("execution failed: {0}")]
    Execution(String),

    /// The command outlived its deadline
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

/// How to authenticate against a host
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    /// Username and password login
    Password {
        /// Login name
        username: String,
        /// Plain password
        password: String,
    },
    /// Key-based login
    PrivateKey {
        /// Login name
        username: String,
        /// PEM-encoded private key
        key_pem: String,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::PrivateKey { username, .. } => f
                .debug_struct("PrivateKey")
                .field("username", username)
                .field("key_pem", &"<redacted>")
                .finish(),
        }
    }
}

/// Already-resolved connection parameters for one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Hostname or IP address
    pub address: String,
    /// Transport port
    pub port: u16,
    /// How to log in
    pub credentials: Credentials,
}

/// Output of a command that ran to completion, whatever its exit code
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Process exit code
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

/// Resolves host ids into connection parameters
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Look up how to reach `host_id`
    async fn resolve_host(&self, host_id: &str) -> Result<ConnectionParams, RemoteError>;
}

/// Runs a command on a remote host
#[async_trait]
pub trait RemoteCommandClient: Send + Sync {
    /// Run `command` against `params`, giving up after `deadline`
    async fn run_command(
        &self,
        params: &ConnectionParams,
        command: &str,
        deadline: Duration,
    ) -> Result<CommandOutput, RemoteError>;
}

/// Host resolver backed by a fixed table
#[derive(Clone, Default)]
pub struct StaticHostResolver {
    hosts: Arc<DashMap<String, ConnectionParams>>,
}

impl StaticHostResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a host
    pub fn insert(&self, host_id: impl Into<String>, params: ConnectionParams) {
        self.hosts.insert(host_id.into(), params);
    }

    /// Remove a host, returning its parameters if it was registered
    pub fn remove(&self, host_id: &str) -> Option<ConnectionParams> {
        self.hosts.remove(host_id).map(|(_, params)| params)
    }
}

impl From<HashMap<String, ConnectionParams>> for StaticHostResolver {
    fn from(hosts: HashMap<String, ConnectionParams>) -> Self {
        Self {
            hosts: Arc::new(hosts.into_iter().collect()),
        }
    }
}

#[async_trait]
impl HostResolver for StaticHostResolver {
    async fn resolve_host(&self, host_id: &str) -> Result<ConnectionParams, RemoteError> {
        self.hosts
            .get(host_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RemoteError::HostNotFound(host_id.to_string()))
    }
}
